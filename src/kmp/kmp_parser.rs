use crate::binary::ByteCursor;
use crate::error::{Error, Result};
use crate::kmp::kmp_enum::{is_known_tag, ChunkKind};
use crate::kmp::kmp_struct::{
    Animation, AnimationClip, ChainSegment, ChainedMotion, ChainingMotion, Chunk, ClipEvent,
    CollisionFace, CollisionGroup, CollisionMesh, CollisionPart, Keyframe, MeshVertex, Model,
    Skeleton, Skin, SkinnedVector, SubMesh, Track, SUBMESH_PARAM_COUNT,
};
use crate::kmp::kmp_util::{read_trs, read_trs_array, read_vec2, read_vec3, VEC3_SIZE};

const SKINNED_VECTOR_SIZE: usize = 16;
const SKIN_SIZE: usize = 12;
const MESH_VERTEX_SIZE: usize = 20;
const TRIANGLE_SIZE: usize = 6;
const EVENT_SIZE: usize = 12;
const KEYFRAME_SIZE: usize = 44;
const SEGMENT_SIZE: usize = 40;
const FACE_SIZE: usize = 16;

// Smallest possible encodings of the variable-length records, used to
// reject counts that cannot fit before anything is allocated.
const MIN_SUBMESH_SIZE: usize = 8 + SUBMESH_PARAM_COUNT * 4 + 1;
const MIN_CLIP_SIZE: usize = 4 + 4 + 4 + 1 + 12 + 4 + 4;
const MIN_TRACK_SIZE: usize = 8;
const MIN_MOTION_SIZE: usize = 8;
const MIN_GROUP_SIZE: usize = 4;
const MIN_PART_SIZE: usize = 8 + VEC3_SIZE + 4 + 4;

type ChunkReader = fn(&mut ByteCursor) -> Result<Chunk>;

const CHUNK_READERS: [(ChunkKind, ChunkReader); 5] = [
    (ChunkKind::Skeleton, read_skeleton_chunk),
    (ChunkKind::Model, read_model_chunk),
    (ChunkKind::Animation, read_animation_chunk),
    (ChunkKind::ChainingMotion, read_chaining_motion_chunk),
    (ChunkKind::CollisionMesh, read_collision_mesh_chunk),
];

/// Decodes the payload of a chunk whose tag has already been consumed.
pub(crate) fn read_chunk(cursor: &mut ByteCursor, kind: ChunkKind) -> Result<Chunk> {
    let reader = CHUNK_READERS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map(|(_, reader)| *reader)
        .ok_or(Error::UnrecognizedChunkKind {
            offset: cursor.position(),
            tag: kind.tag(),
        })?;
    read_header(cursor, kind)?;
    reader(cursor)
}

fn read_header(cursor: &mut ByteCursor, kind: ChunkKind) -> Result<()> {
    let offset = cursor.position();
    let actual = cursor.read_u32()?;
    let expected = kind.header();
    if actual != expected {
        return Err(Error::MalformedChunkHeader {
            offset,
            expected,
            actual,
        });
    }
    Ok(())
}

fn read_skeleton_chunk(cursor: &mut ByteCursor) -> Result<Chunk> {
    read_skeleton(cursor).map(Chunk::Skeleton)
}

fn read_model_chunk(cursor: &mut ByteCursor) -> Result<Chunk> {
    read_model(cursor).map(Chunk::Model)
}

fn read_animation_chunk(cursor: &mut ByteCursor) -> Result<Chunk> {
    read_animation(cursor).map(Chunk::Animation)
}

fn read_chaining_motion_chunk(cursor: &mut ByteCursor) -> Result<Chunk> {
    read_chaining_motion(cursor).map(Chunk::ChainingMotion)
}

fn read_collision_mesh_chunk(cursor: &mut ByteCursor) -> Result<Chunk> {
    read_collision_mesh(cursor).map(Chunk::CollisionMesh)
}

pub(crate) fn read_skeleton(cursor: &mut ByteCursor) -> Result<Skeleton> {
    let bone_count = cursor.read_len()?;
    let flags = cursor.read_i32()?;
    cursor.require(bone_count, 4)?;
    let parents = cursor.read_array(bone_count, |c| c.read_i32())?;
    let transforms = read_trs_array(cursor, bone_count)?;

    // The second table has no header of its own; it is there exactly when
    // the next word does not start another top-level record.
    let absolute_transforms = match cursor.peek_u32() {
        Some(next) if bone_count > 0 && !is_known_tag(next) => {
            Some(read_trs_array(cursor, bone_count)?)
        }
        _ => None,
    };

    Ok(Skeleton {
        flags,
        parents,
        transforms,
        absolute_transforms,
    })
}

fn read_skinned_vector(cursor: &mut ByteCursor) -> Result<SkinnedVector> {
    Ok(SkinnedVector {
        value: read_vec3(cursor)?,
        skin_index: cursor.read_i32()?,
    })
}

fn read_skin(cursor: &mut ByteCursor) -> Result<Skin> {
    Ok(Skin {
        bone_index: cursor.read_i32()?,
        weights: [cursor.read_f32()?, cursor.read_f32()?],
    })
}

pub(crate) fn read_model(cursor: &mut ByteCursor) -> Result<Model> {
    let vertex_count = cursor.read_len()?;
    let normal_count = cursor.read_len()?;
    let skin_count = cursor.read_len()?;

    cursor.require(vertex_count, SKINNED_VECTOR_SIZE)?;
    let vertices = cursor.read_array(vertex_count, read_skinned_vector)?;
    cursor.require(normal_count, SKINNED_VECTOR_SIZE)?;
    let normals = cursor.read_array(normal_count, read_skinned_vector)?;
    cursor.require(skin_count, SKIN_SIZE)?;
    let skins = cursor.read_array(skin_count, read_skin)?;

    let mesh_count = cursor.read_count(MIN_SUBMESH_SIZE)?;
    let meshes = cursor.read_array(mesh_count, read_submesh)?;

    Ok(Model {
        vertices,
        normals,
        skins,
        meshes,
    })
}

fn read_mesh_vertex(cursor: &mut ByteCursor) -> Result<MeshVertex> {
    Ok(MeshVertex {
        vertex_index: cursor.read_i32()?,
        normal_index: cursor.read_i32()?,
        skin_index: cursor.read_i32()?,
        uv: read_vec2(cursor)?,
    })
}

fn read_submesh(cursor: &mut ByteCursor) -> Result<SubMesh> {
    let vertex_count = cursor.read_len()?;
    let triangle_count = cursor.read_len()?;

    let mut params = [0f32; SUBMESH_PARAM_COUNT];
    for param in params.iter_mut() {
        *param = cursor.read_f32()?;
    }
    let texture = cursor.read_cstring()?;

    cursor.require(vertex_count, MESH_VERTEX_SIZE)?;
    let vertices = cursor.read_array(vertex_count, read_mesh_vertex)?;
    cursor.require(triangle_count, TRIANGLE_SIZE)?;
    let triangles = cursor.read_array(triangle_count, |c| {
        Ok([c.read_i16()?, c.read_i16()?, c.read_i16()?])
    })?;

    Ok(SubMesh {
        params,
        texture,
        vertices,
        triangles,
    })
}

pub(crate) fn read_animation(cursor: &mut ByteCursor) -> Result<Animation> {
    let clip_count = cursor.read_count(MIN_CLIP_SIZE)?;
    let clips = cursor.read_array(clip_count, read_clip)?;
    Ok(Animation { clips })
}

fn read_event(cursor: &mut ByteCursor) -> Result<ClipEvent> {
    Ok(ClipEvent {
        time: cursor.read_f32()?,
        id: cursor.read_i32()?,
        value: cursor.read_f32()?,
    })
}

fn read_clip(cursor: &mut ByteCursor) -> Result<AnimationClip> {
    let track_count = cursor.read_len()?;
    let duration = cursor.read_f32()?;
    let frame_duration = cursor.read_f32()?;
    let flag = cursor.read_u8()?;
    let params = [cursor.read_f32()?, cursor.read_f32()?, cursor.read_f32()?];

    let event_count = cursor.read_count(EVENT_SIZE)?;
    let events = cursor.read_array(event_count, read_event)?;
    let secondary_count = cursor.read_count(EVENT_SIZE)?;
    let secondary_events = cursor.read_array(secondary_count, read_event)?;

    cursor.require(track_count, MIN_TRACK_SIZE)?;
    let tracks = cursor.read_array(track_count, read_track)?;

    Ok(AnimationClip {
        duration,
        frame_duration,
        flag,
        params,
        events,
        secondary_events,
        tracks,
    })
}

fn read_track(cursor: &mut ByteCursor) -> Result<Track> {
    let bone_index = cursor.read_i32()?;
    let frame_count = cursor.read_count(KEYFRAME_SIZE)?;
    let frames = cursor.read_array(frame_count, |c| {
        Ok(Keyframe {
            time: c.read_f32()?,
            transform: read_trs(c)?,
        })
    })?;
    Ok(Track { bone_index, frames })
}

pub(crate) fn read_chaining_motion(cursor: &mut ByteCursor) -> Result<ChainingMotion> {
    let motion_count = cursor.read_count(MIN_MOTION_SIZE)?;
    let motions = cursor.read_array(motion_count, read_chained_motion)?;
    Ok(ChainingMotion { motions })
}

fn read_chained_motion(cursor: &mut ByteCursor) -> Result<ChainedMotion> {
    let duration = cursor.read_f32()?;
    let segment_count = cursor.read_count(SEGMENT_SIZE)?;
    let segments = cursor.read_array(segment_count, read_segment)?;
    Ok(ChainedMotion { duration, segments })
}

fn read_segment(cursor: &mut ByteCursor) -> Result<ChainSegment> {
    Ok(ChainSegment {
        clip_index: cursor.read_i32()?,
        begin_time: cursor.read_f32()?,
        playback_speed: cursor.read_f32()?,
        aux: [cursor.read_f32()?, cursor.read_f32()?],
        aux_id: cursor.read_i32()?,
        aux_tail: [
            cursor.read_f32()?,
            cursor.read_f32()?,
            cursor.read_f32()?,
            cursor.read_f32()?,
        ],
    })
}

pub(crate) fn read_collision_mesh(cursor: &mut ByteCursor) -> Result<CollisionMesh> {
    let group_count = cursor.read_count(MIN_GROUP_SIZE)?;
    let groups = cursor.read_array(group_count, |c| {
        let part_count = c.read_count(MIN_PART_SIZE)?;
        Ok(CollisionGroup {
            parts: c.read_array(part_count, read_collision_part)?,
        })
    })?;
    Ok(CollisionMesh { groups })
}

fn read_collision_part(cursor: &mut ByteCursor) -> Result<CollisionPart> {
    let vertex_count = cursor.read_len()?;
    let face_count = cursor.read_len()?;
    let center = read_vec3(cursor)?;
    let radius = cursor.read_f32()?;
    let flags = cursor.read_i32()?;

    cursor.require(vertex_count, VEC3_SIZE)?;
    let vertices = cursor.read_array(vertex_count, read_vec3)?;
    cursor.require(face_count, FACE_SIZE)?;
    let faces = cursor.read_array(face_count, |c| {
        Ok(CollisionFace {
            indices: [c.read_i32()?, c.read_i32()?, c.read_i32()?],
            value: c.read_f32()?,
        })
    })?;

    Ok(CollisionPart {
        center,
        radius,
        flags,
        vertices,
        faces,
    })
}

