use glam::{Mat4, Quat, Vec2, Vec3};

use crate::kmp::kmp_enum::ChunkKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Skeleton(Skeleton),
    Model(Model),
    Animation(Animation),
    ChainingMotion(ChainingMotion),
    CollisionMesh(CollisionMesh),
}

impl Chunk {
    pub fn kind(&self) -> ChunkKind {
        match self {
            Chunk::Skeleton(_) => ChunkKind::Skeleton,
            Chunk::Model(_) => ChunkKind::Model,
            Chunk::Animation(_) => ChunkKind::Animation,
            Chunk::ChainingMotion(_) => ChunkKind::ChainingMotion,
            Chunk::CollisionMesh(_) => ChunkKind::CollisionMesh,
        }
    }
}

/// One scale/rotation/translation triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trs {
    pub scale: Vec3,
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for Trs {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
        }
    }
}

impl Trs {
    /// Scale first, then rotation, then translation.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Parallel per-bone transform columns. Stored on disk as every scale,
/// then every rotation, then every translation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrsArray {
    pub scale: Vec<Vec3>,
    pub rotation: Vec<Quat>,
    pub translation: Vec<Vec3>,
}

impl TrsArray {
    pub fn len(&self) -> usize {
        self.scale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Trs> {
        Some(Trs {
            scale: *self.scale.get(index)?,
            rotation: *self.rotation.get(index)?,
            translation: *self.translation.get(index)?,
        })
    }

    pub fn push(&mut self, trs: Trs) {
        self.scale.push(trs.scale);
        self.rotation.push(trs.rotation);
        self.translation.push(trs.translation);
    }
}

impl FromIterator<Trs> for TrsArray {
    fn from_iter<I: IntoIterator<Item = Trs>>(iter: I) -> Self {
        let mut array = TrsArray::default();
        for trs in iter {
            array.push(trs);
        }
        array
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    /// Not interpreted.
    pub flags: i32,
    /// `-1` marks a root bone.
    pub parents: Vec<i32>,
    pub transforms: TrsArray,
    /// Per-bone absolute bind transforms. Present only in files that carry
    /// a second table.
    pub absolute_transforms: Option<TrsArray>,
}

impl Skeleton {
    pub fn bone_count(&self) -> usize {
        self.parents.len()
    }
}

/// A position or normal with its opaque skin reference.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SkinnedVector {
    pub value: Vec3,
    pub skin_index: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Skin {
    pub bone_index: i32,
    pub weights: [f32; 2],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshVertex {
    pub vertex_index: i32,
    pub normal_index: i32,
    pub skin_index: i32,
    pub uv: Vec2,
}

pub const SUBMESH_PARAM_COUNT: usize = 17;

#[derive(Debug, Clone, PartialEq)]
pub struct SubMesh {
    pub params: [f32; SUBMESH_PARAM_COUNT],
    pub texture: String,
    pub vertices: Vec<MeshVertex>,
    pub triangles: Vec<[i16; 3]>,
}

impl Default for SubMesh {
    fn default() -> Self {
        Self {
            params: [0.0; SUBMESH_PARAM_COUNT],
            texture: String::new(),
            vertices: Vec::new(),
            triangles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub vertices: Vec<SkinnedVector>,
    pub normals: Vec<SkinnedVector>,
    pub skins: Vec<Skin>,
    pub meshes: Vec<SubMesh>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipEvent {
    pub time: f32,
    pub id: i32,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub transform: Trs,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub bone_index: i32,
    pub frames: Vec<Keyframe>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationClip {
    pub duration: f32,
    pub frame_duration: f32,
    pub flag: u8,
    pub params: [f32; 3],
    pub events: Vec<ClipEvent>,
    pub secondary_events: Vec<ClipEvent>,
    pub tracks: Vec<Track>,
}

impl AnimationClip {
    /// First track animating `bone`, if any.
    pub fn track_for_bone(&self, bone: usize) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|track| usize::try_from(track.bone_index).ok() == Some(bone))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Animation {
    pub clips: Vec<AnimationClip>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainSegment {
    pub clip_index: i32,
    pub begin_time: f32,
    pub playback_speed: f32,
    pub aux: [f32; 2],
    pub aux_id: i32,
    pub aux_tail: [f32; 4],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainedMotion {
    pub duration: f32,
    pub segments: Vec<ChainSegment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainingMotion {
    pub motions: Vec<ChainedMotion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollisionFace {
    pub indices: [i32; 3],
    pub value: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionPart {
    pub center: Vec3,
    pub radius: f32,
    pub flags: i32,
    pub vertices: Vec<Vec3>,
    pub faces: Vec<CollisionFace>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionGroup {
    pub parts: Vec<CollisionPart>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionMesh {
    pub groups: Vec<CollisionGroup>,
}
