use std::fmt;

/// Marks the start of a chunk sequence. Carries no payload.
pub const BEGIN_SENTINEL: u32 = 0x6B4D_0008;
/// Marks the end of a chunk sequence. Carries no payload.
pub const END_SENTINEL: u32 = 0x2F6B_4D00;

/// Flag OR-ed into a chunk tag to form the redundant header that opens
/// every chunk payload.
pub const HEADER_FLAG: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ChunkKind {
    Skeleton = 0x6B53_0000,
    Model = 0x6B4D_0000,
    Animation = 0x6B6D_0000,
    ChainingMotion = 0x636D_0000,
    CollisionMesh = 0x6B43_0000,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 5] = [
        ChunkKind::Skeleton,
        ChunkKind::Model,
        ChunkKind::Animation,
        ChunkKind::ChainingMotion,
        ChunkKind::CollisionMesh,
    ];

    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub const fn header(self) -> u32 {
        self.tag() | HEADER_FLAG
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkKind::Skeleton => "skeleton",
            ChunkKind::Model => "model",
            ChunkKind::Animation => "animation",
            ChunkKind::ChainingMotion => "chaining motion",
            ChunkKind::CollisionMesh => "collision mesh",
        };
        f.write_str(name)
    }
}

/// True for any tag that may start the next top-level record.
pub fn is_known_tag(tag: u32) -> bool {
    tag == BEGIN_SENTINEL || tag == END_SENTINEL || ChunkKind::from_tag(tag).is_some()
}
