//! glTF 2.0 buffer allocation and container encoding on top of `gltf_json`.

pub mod gltf_buffer;
pub mod gltf_codec;

pub use gltf_buffer::{AccessorElement, AccessorOptions, BufferAllocator, BufferSelector};
pub use gltf_codec::{
    compile_to_multiple_files, compile_to_single_binary, load_from_binary, load_from_files,
    write_multiple_files, write_single_binary, CancelFlag, OutputFile,
};

use gltf_json as json;
use gltf_json::validation::USize64;

use crate::error::{Error, Result};

/// A root with the generator set and one empty default scene.
pub fn empty_root() -> json::Root {
    json::Root {
        asset: json::Asset {
            generator: Some(concat!("kmp2gltf ", env!("CARGO_PKG_VERSION")).to_string()),
            version: "2.0".to_string(),
            ..Default::default()
        },
        scene: Some(json::Index::new(0)),
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            nodes: Vec::new(),
        }],
        ..Default::default()
    }
}

/// Appends `item` and returns its index.
pub fn push<T>(items: &mut Vec<T>, item: T) -> json::Index<T> {
    items.push(item);
    json::Index::new(items.len() as u32 - 1)
}

pub(crate) fn index<T>(value: usize) -> json::Index<T> {
    json::Index::new(value as u32)
}

/// Values too large for the address space saturate and then fail bounds
/// checks like any other bad length.
pub(crate) fn to_usize(value: USize64) -> usize {
    usize::try_from(value.0).unwrap_or(usize::MAX)
}

/// Raw bytes behind one glTF buffer. A buffer without a URI is the one
/// embedded in the BIN chunk (or written as `<name>.bin`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackingBuffer {
    pub uri: Option<String>,
    pub data: Vec<u8>,
}

impl BackingBuffer {
    pub fn describe(&self) -> json::Buffer {
        json::Buffer {
            byte_length: USize64::from(self.data.len()),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: self.uri.clone(),
        }
    }
}

/// A complete glTF graph with the bytes of every buffer it references.
/// `root.buffers[i]` describes `buffers[i]`.
#[derive(Debug, Clone, Default)]
pub struct GltfDocument {
    pub root: json::Root,
    pub buffers: Vec<BackingBuffer>,
}

impl GltfDocument {
    /// The bytes covered by buffer view `index`.
    pub fn read_buffer_view(&self, index: usize) -> Result<&[u8]> {
        let view = self
            .root
            .buffer_views
            .get(index)
            .ok_or(Error::IndexOutOfRange {
                what: "buffer view",
                index: index as i64,
                len: self.root.buffer_views.len(),
            })?;
        let buffer_index = view.buffer.value();
        let buffer = self.buffers.get(buffer_index).ok_or(Error::IndexOutOfRange {
            what: "buffer",
            index: buffer_index as i64,
            len: self.buffers.len(),
        })?;
        let offset = view.byte_offset.map_or(0, to_usize);
        let end = offset.saturating_add(to_usize(view.byte_length));
        buffer
            .data
            .get(offset..end)
            .ok_or(Error::BufferViewOutOfBounds {
                view: index,
                buffer: buffer_index,
                offset,
                end,
                length: buffer.data.len(),
            })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.root)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }
}
