//! Byte-level builder for KMP test inputs.

use byteorder::{LittleEndian, WriteBytesExt};
use glam::{Quat, Vec2, Vec3};

use crate::kmp::kmp_enum::{ChunkKind, BEGIN_SENTINEL, END_SENTINEL};
use crate::kmp::kmp_struct::{
    Animation, ChainingMotion, CollisionMesh, Model, Skeleton, Trs, TrsArray,
};

#[derive(Default)]
pub(crate) struct KmpBuilder {
    bytes: Vec<u8>,
}

impl KmpBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    pub(crate) fn u32(mut self, value: u32) -> Self {
        self.bytes.write_u32::<LittleEndian>(value).unwrap();
        self
    }

    pub(crate) fn i32(mut self, value: i32) -> Self {
        self.bytes.write_i32::<LittleEndian>(value).unwrap();
        self
    }

    pub(crate) fn i16(mut self, value: i16) -> Self {
        self.bytes.write_i16::<LittleEndian>(value).unwrap();
        self
    }

    pub(crate) fn f32(mut self, value: f32) -> Self {
        self.bytes.write_f32::<LittleEndian>(value).unwrap();
        self
    }

    pub(crate) fn len(self, len: usize) -> Self {
        self.i32(len as i32)
    }

    pub(crate) fn vec2(self, v: Vec2) -> Self {
        self.f32(v.x).f32(v.y)
    }

    pub(crate) fn vec3(self, v: Vec3) -> Self {
        self.f32(v.x).f32(v.y).f32(v.z)
    }

    pub(crate) fn quat(self, q: Quat) -> Self {
        self.f32(q.x).f32(q.y).f32(q.z).f32(q.w)
    }

    pub(crate) fn cstring(mut self, text: &str) -> Self {
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        self
    }

    pub(crate) fn begin(self) -> Self {
        self.u32(BEGIN_SENTINEL)
    }

    pub(crate) fn end(self) -> Self {
        self.u32(END_SENTINEL)
    }

    pub(crate) fn chunk_start(self, kind: ChunkKind) -> Self {
        self.u32(kind.tag()).u32(kind.header())
    }

    fn trs(self, trs: &Trs) -> Self {
        self.vec3(trs.scale).quat(trs.rotation).vec3(trs.translation)
    }

    fn trs_array(mut self, array: &TrsArray) -> Self {
        for s in &array.scale {
            self = self.vec3(*s);
        }
        for r in &array.rotation {
            self = self.quat(*r);
        }
        for t in &array.translation {
            self = self.vec3(*t);
        }
        self
    }

    pub(crate) fn skeleton(mut self, skeleton: &Skeleton) -> Self {
        self = self
            .chunk_start(ChunkKind::Skeleton)
            .len(skeleton.parents.len())
            .i32(skeleton.flags);
        for parent in &skeleton.parents {
            self = self.i32(*parent);
        }
        self = self.trs_array(&skeleton.transforms);
        if let Some(absolute_transforms) = &skeleton.absolute_transforms {
            self = self.trs_array(absolute_transforms);
        }
        self
    }

    pub(crate) fn model(mut self, model: &Model) -> Self {
        self = self
            .chunk_start(ChunkKind::Model)
            .len(model.vertices.len())
            .len(model.normals.len())
            .len(model.skins.len());
        for v in model.vertices.iter().chain(&model.normals) {
            self = self.vec3(v.value).i32(v.skin_index);
        }
        for skin in &model.skins {
            self = self
                .i32(skin.bone_index)
                .f32(skin.weights[0])
                .f32(skin.weights[1]);
        }
        self = self.len(model.meshes.len());
        for mesh in &model.meshes {
            self = self.len(mesh.vertices.len()).len(mesh.triangles.len());
            for param in mesh.params {
                self = self.f32(param);
            }
            self = self.cstring(&mesh.texture);
            for v in &mesh.vertices {
                self = self
                    .i32(v.vertex_index)
                    .i32(v.normal_index)
                    .i32(v.skin_index)
                    .vec2(v.uv);
            }
            for [a, b, c] in &mesh.triangles {
                self = self.i16(*a).i16(*b).i16(*c);
            }
        }
        self
    }

    pub(crate) fn animation(mut self, animation: &Animation) -> Self {
        self = self
            .chunk_start(ChunkKind::Animation)
            .len(animation.clips.len());
        for clip in &animation.clips {
            self = self
                .len(clip.tracks.len())
                .f32(clip.duration)
                .f32(clip.frame_duration)
                .u8(clip.flag);
            for param in clip.params {
                self = self.f32(param);
            }
            for events in [&clip.events, &clip.secondary_events] {
                self = self.len(events.len());
                for event in events {
                    self = self.f32(event.time).i32(event.id).f32(event.value);
                }
            }
            for track in &clip.tracks {
                self = self.i32(track.bone_index).len(track.frames.len());
                for frame in &track.frames {
                    self = self.f32(frame.time).trs(&frame.transform);
                }
            }
        }
        self
    }

    pub(crate) fn chaining_motion(mut self, chaining: &ChainingMotion) -> Self {
        self = self
            .chunk_start(ChunkKind::ChainingMotion)
            .len(chaining.motions.len());
        for motion in &chaining.motions {
            self = self.f32(motion.duration).len(motion.segments.len());
            for segment in &motion.segments {
                self = self
                    .i32(segment.clip_index)
                    .f32(segment.begin_time)
                    .f32(segment.playback_speed)
                    .f32(segment.aux[0])
                    .f32(segment.aux[1])
                    .i32(segment.aux_id);
                for value in segment.aux_tail {
                    self = self.f32(value);
                }
            }
        }
        self
    }

    pub(crate) fn collision_mesh(mut self, collision: &CollisionMesh) -> Self {
        self = self
            .chunk_start(ChunkKind::CollisionMesh)
            .len(collision.groups.len());
        for group in &collision.groups {
            self = self.len(group.parts.len());
            for part in &group.parts {
                self = self
                    .len(part.vertices.len())
                    .len(part.faces.len())
                    .vec3(part.center)
                    .f32(part.radius)
                    .i32(part.flags);
                for v in &part.vertices {
                    self = self.vec3(*v);
                }
                for face in &part.faces {
                    self = self
                        .i32(face.indices[0])
                        .i32(face.indices[1])
                        .i32(face.indices[2])
                        .f32(face.value);
                }
            }
        }
        self
    }
}

/// A chain of bones `0 <- 1 <- 2 ...`, each offset one unit along +Y.
pub(crate) fn bone_chain(count: usize) -> Skeleton {
    Skeleton {
        flags: 0,
        parents: (0..count as i32).map(|i| i - 1).collect(),
        transforms: (0..count)
            .map(|_| Trs {
                translation: Vec3::Y,
                ..Trs::default()
            })
            .collect(),
        absolute_transforms: None,
    }
}
