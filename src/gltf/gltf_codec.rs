//! GLB and multi-file (`.gltf` + buffers) encoding and decoding.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use gltf_json as json;
use gltf_json::validation::USize64;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::binary::{align4, BinaryWriter, ByteCursor};
use crate::error::{Error, Result};
use crate::gltf::{index, to_usize, BackingBuffer, GltfDocument};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const GLB_HEADER_SIZE: usize = 12;
const CHUNK_HEADER_SIZE: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const MAX_CONCURRENT_WRITES: usize = 8;

/// One file of a multi-file export, named relative to the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Shared flag that stops pending writes from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Packs every buffer view of `document` into one binary chunk and
/// returns the GLB bytes. `document` is left untouched.
pub fn compile_to_single_binary(document: &GltfDocument) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_single_binary(document, &mut out)?;
    Ok(out)
}

pub fn write_single_binary<W: Write>(document: &GltfDocument, writer: W) -> Result<()> {
    if document
        .buffers
        .iter()
        .filter(|buffer| buffer.uri.is_none())
        .count()
        > 1
    {
        return Err(Error::MultipleEmbeddedBuffers);
    }

    let mut root = document.root.clone();
    let mut bin = Vec::new();
    let mut views = Vec::with_capacity(root.buffer_views.len());
    for (view_index, view) in root.buffer_views.iter().enumerate() {
        let bytes = document.read_buffer_view(view_index)?;
        let offset = align4(bin.len());
        bin.resize(offset, 0);
        bin.extend_from_slice(bytes);
        views.push(json::buffer::View {
            buffer: index(0),
            byte_offset: Some(USize64::from(offset)),
            ..view.clone()
        });
    }
    root.buffer_views = views;
    root.buffers = if root.buffer_views.is_empty() {
        Vec::new()
    } else {
        vec![json::Buffer {
            byte_length: USize64::from(bin.len()),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        }]
    };

    let json_bytes = serde_json::to_vec(&root)?;
    let json_padding = align4(json_bytes.len()) - json_bytes.len();
    let bin_padding = align4(bin.len()) - bin.len();
    let total = GLB_HEADER_SIZE
        + CHUNK_HEADER_SIZE
        + json_bytes.len()
        + json_padding
        + CHUNK_HEADER_SIZE
        + bin.len()
        + bin_padding;
    let total_u32 = u32::try_from(total).map_err(|_| Error::ContainerTooLarge { length: total })?;

    let mut writer = BinaryWriter::new(writer);
    writer.write_u32(GLB_MAGIC)?;
    writer.write_u32(GLB_VERSION)?;
    writer.write_u32(total_u32)?;

    writer.write_u32((json_bytes.len() + json_padding) as u32)?;
    writer.write_u32(CHUNK_JSON)?;
    writer.write_vec(&json_bytes)?;
    writer.write_padding(json_padding, b' ')?;

    writer.write_u32((bin.len() + bin_padding) as u32)?;
    writer.write_u32(CHUNK_BIN)?;
    writer.write_vec(&bin)?;
    writer.write_padding(bin_padding, 0)?;
    writer.flush()?;

    debug!(
        "glb: {} bytes ({} json, {} bin)",
        total,
        json_bytes.len(),
        bin.len()
    );
    Ok(())
}

/// Lays `document` out as `<base>.gltf` followed by one file per buffer.
pub fn compile_to_multiple_files(
    document: &GltfDocument,
    base_name: &str,
) -> Result<Vec<OutputFile>> {
    let base = base_name.replace(':', "_");
    let mut root = document.root.clone();
    root.buffers = Vec::with_capacity(document.buffers.len());

    let mut files = Vec::with_capacity(document.buffers.len() + 1);
    let mut first_unnamed = true;
    for (index, buffer) in document.buffers.iter().enumerate() {
        let uri = match &buffer.uri {
            Some(uri) => uri.clone(),
            None if first_unnamed => {
                first_unnamed = false;
                format!("{base}.bin")
            }
            None => format!("{base}.bin{index}"),
        };
        root.buffers.push(json::Buffer {
            uri: Some(uri.clone()),
            ..buffer.describe()
        });
        files.push(OutputFile {
            name: uri,
            data: buffer.data.clone(),
        });
    }

    files.insert(
        0,
        OutputFile {
            name: format!("{base}.gltf"),
            data: serde_json::to_vec_pretty(&root)?,
        },
    );
    Ok(files)
}

/// Writes `files` into `dir` concurrently.
///
/// Once `cancel` is raised, writes that have not started are skipped while
/// running ones finish. The first failing write raises `cancel` itself and
/// its error is returned. Nothing is retried.
pub async fn write_multiple_files(
    dir: &Path,
    files: Vec<OutputFile>,
    cancel: &CancelFlag,
) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_WRITES));
    let mut tasks = JoinSet::new();
    for file in files {
        let permits = permits.clone();
        let cancel = cancel.clone();
        let path = dir.join(&file.name);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(io::Error::other)?;
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Err(err) = tokio::fs::write(&path, &file.data).await {
                cancel.cancel();
                return Err(Error::Io(err));
            }
            Ok::<_, Error>(Some(path))
        });
    }

    let mut first_error = None;
    let mut skipped = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(Some(path))) => debug!("wrote {}", path.display()),
            Ok(Ok(None)) => skipped += 1,
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(join_error) => {
                cancel.cancel();
                first_error.get_or_insert(Error::Io(io::Error::other(join_error)));
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if skipped > 0 {
        warn!("{}: {} writes skipped after cancellation", dir.display(), skipped);
        return Err(Error::Cancelled { skipped });
    }
    Ok(())
}

struct RawChunk<'a> {
    kind: u32,
    data: &'a [u8],
}

fn read_chunk<'a>(cursor: &mut ByteCursor<'a>, total: usize) -> Result<RawChunk<'a>> {
    let length = cursor.read_u32()? as usize;
    let kind = cursor.read_u32()?;
    if length > cursor.remaining() {
        return Err(Error::TruncatedContainer {
            declared: GLB_HEADER_SIZE + cursor.position() + length,
            actual: total,
        });
    }
    Ok(RawChunk {
        kind,
        data: cursor.take(length)?,
    })
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidContainerFormat {
        message: message.into(),
    }
}

/// Splits GLB bytes into the JSON graph and the BIN payload.
fn parse_binary(bytes: &[u8]) -> Result<(json::Root, Vec<u8>)> {
    if bytes.len() < GLB_HEADER_SIZE {
        return Err(invalid(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let magic = LittleEndian::read_u32(&bytes[0..4]);
    if magic != GLB_MAGIC {
        return Err(invalid(format!("bad magic {magic:#010x}")));
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != GLB_VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }
    let declared = LittleEndian::read_u32(&bytes[8..12]) as usize;
    if declared > bytes.len() {
        return Err(Error::TruncatedContainer {
            declared,
            actual: bytes.len(),
        });
    }
    if declared < GLB_HEADER_SIZE {
        return Err(invalid(format!(
            "declared length {declared} is shorter than the header"
        )));
    }

    let mut cursor = ByteCursor::new(&bytes[GLB_HEADER_SIZE..declared]);
    let json_chunk = read_chunk(&mut cursor, declared)?;
    if json_chunk.kind != CHUNK_JSON {
        return Err(Error::UnexpectedChunkKind {
            index: 0,
            expected: CHUNK_JSON,
            actual: json_chunk.kind,
        });
    }
    if cursor.is_empty() {
        return Err(invalid("missing BIN chunk"));
    }
    let bin = read_chunk(&mut cursor, declared)?;
    if bin.kind != CHUNK_BIN {
        return Err(Error::UnexpectedChunkKind {
            index: 1,
            expected: CHUNK_BIN,
            actual: bin.kind,
        });
    }
    if !cursor.is_empty() {
        return Err(invalid(format!(
            "{} trailing bytes after the BIN chunk",
            cursor.remaining()
        )));
    }

    let root: json::Root = serde_json::from_slice(json_chunk.data)?;
    Ok((root, bin.data.to_vec()))
}

/// Pairs each buffer in `root` with its bytes. The URI-less buffer takes
/// `embedded`; the rest are fetched through `resolve`.
fn attach_buffers(
    root: json::Root,
    mut embedded: Option<Vec<u8>>,
    mut resolve: impl FnMut(&str) -> Result<Vec<u8>>,
) -> Result<GltfDocument> {
    if root.buffers.iter().filter(|buffer| buffer.uri.is_none()).count() > 1 {
        return Err(Error::MultipleEmbeddedBuffers);
    }

    let mut buffers = Vec::with_capacity(root.buffers.len());
    for buffer in &root.buffers {
        let mut data = match &buffer.uri {
            Some(uri) => resolve(uri)?,
            None => embedded.take().ok_or(Error::MissingEmbeddedBuffer)?,
        };
        let declared = to_usize(buffer.byte_length);
        if data.len() < declared {
            return Err(Error::TruncatedContainer {
                declared,
                actual: data.len(),
            });
        }
        data.truncate(declared);
        buffers.push(BackingBuffer {
            uri: buffer.uri.clone(),
            data,
        });
    }
    Ok(GltfDocument { root, buffers })
}

/// Parses a GLB container. Buffers with a URI cannot be resolved from
/// bytes alone and are rejected.
pub fn load_from_binary(bytes: &[u8]) -> Result<GltfDocument> {
    let (root, bin) = parse_binary(bytes)?;
    attach_buffers(root, Some(bin), |uri| {
        Err(invalid(format!("external buffer {uri} in a binary container")))
    })
}

/// Loads a `.glb` or `.gltf` file, resolving buffer URIs next to it.
/// `embedded` supplies the URI-less buffer of a text document.
pub fn load_from_files<P: AsRef<Path>>(
    path: P,
    embedded: Option<Vec<u8>>,
) -> Result<GltfDocument> {
    let path = path.as_ref();
    let base_dir: PathBuf = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let resolve = |uri: &str| -> Result<Vec<u8>> { Ok(fs::read(base_dir.join(uri))?) };

    let bytes = fs::read(path)?;
    let is_binary = bytes.len() >= 4 && LittleEndian::read_u32(&bytes[..4]) == GLB_MAGIC;
    if is_binary {
        let (root, bin) = parse_binary(&bytes)?;
        attach_buffers(root, Some(bin), resolve)
    } else {
        let root: json::Root = serde_json::from_slice(&bytes)?;
        attach_buffers(root, embedded, resolve)
    }
}
