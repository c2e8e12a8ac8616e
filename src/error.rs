use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "unexpected end of input at offset {offset}: \
         needed {needed} bytes, {remaining} remaining"
    )]
    TruncatedInput {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error(
        "malformed chunk header at offset {offset}: \
         expected {expected:#010x}, found {actual:#010x}"
    )]
    MalformedChunkHeader {
        offset: usize,
        expected: u32,
        actual: u32,
    },

    #[error("unrecognized chunk tag {tag:#010x} at offset {offset}")]
    UnrecognizedChunkKind { offset: usize, tag: u32 },

    #[error("invalid element count {count} at offset {offset}")]
    InvalidCount { offset: usize, count: i32 },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidString { offset: usize },

    #[error("invalid container format: {message}")]
    InvalidContainerFormat { message: String },

    #[error("truncated container: declared {declared} bytes, found {actual}")]
    TruncatedContainer { declared: usize, actual: usize },

    #[error("unexpected chunk at index {index}: expected {expected:#010x}, found {actual:#010x}")]
    UnexpectedChunkKind {
        index: usize,
        expected: u32,
        actual: u32,
    },

    #[error("container length {length} does not fit the 32-bit length field")]
    ContainerTooLarge { length: usize },

    #[error("bind pose of bone {bone} is not invertible")]
    SingularBindPose { bone: usize },

    #[error("bind pose of bone {bone} could not be decomposed")]
    BindPoseDecompositionFailed { bone: usize },

    #[error("keyframe {frame} of bone {bone} could not be decomposed")]
    KeyframeDecompositionFailed { bone: usize, frame: usize },

    #[error("bone {bone} has parent {parent}; parents must precede their children")]
    BoneOrder { bone: usize, parent: i32 },

    #[error("skeleton has no inverse-bind table")]
    MissingInverseBindTable,

    #[error("unsupported accessor element type: {kind}")]
    UnsupportedElementType { kind: &'static str },

    #[error("accessor {accessor} has {expected}-byte elements, requested {actual}-byte elements")]
    AccessorShapeMismatch {
        accessor: usize,
        expected: usize,
        actual: usize,
    },

    #[error("buffer view {view} range {offset}..{end} exceeds buffer {buffer} of {length} bytes")]
    BufferViewOutOfBounds {
        view: usize,
        buffer: usize,
        offset: usize,
        end: usize,
        length: usize,
    },

    #[error("more than one buffer has no uri")]
    MultipleEmbeddedBuffers,

    #[error("a buffer has no uri and no embedded data was supplied")]
    MissingEmbeddedBuffer,

    #[error("{what} index {index} out of range (length {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        len: usize,
    },

    #[error("segment {segment} of chained motion {motion} has playback speed {speed}")]
    InvalidPlaybackSpeed {
        motion: usize,
        segment: usize,
        speed: f32,
    },

    #[error("cancelled; {skipped} pending writes skipped")]
    Cancelled { skipped: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}
