//! KMP container decoding.
//!
//! A KMP file is a flat sequence of `(tag, payload)` chunks, optionally
//! wrapped in begin/end sentinels. Each payload repeats its tag with the
//! header flag set, followed by fixed scalars and length-prefixed arrays.

pub mod kmp_enum;
pub(crate) mod kmp_parser;
pub mod kmp_struct;
pub(crate) mod kmp_util;

#[cfg(test)]
pub(crate) mod kmp_fixture;

use std::{fs, path::Path};

use tracing::debug;

use crate::binary::ByteCursor;
use crate::error::{Error, Result};
use kmp_enum::{ChunkKind, BEGIN_SENTINEL, END_SENTINEL};
use kmp_struct::{Animation, ChainingMotion, Chunk, CollisionMesh, Model, Skeleton};

/// Every chunk of a decoded file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    pub chunks: Vec<Chunk>,
}

impl Container {
    pub fn skeleton(&self) -> Option<&Skeleton> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::Skeleton(skeleton) => Some(skeleton),
            _ => None,
        })
    }

    pub fn model(&self) -> Option<&Model> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::Model(model) => Some(model),
            _ => None,
        })
    }

    pub fn animation(&self) -> Option<&Animation> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::Animation(animation) => Some(animation),
            _ => None,
        })
    }

    pub fn chaining_motion(&self) -> Option<&ChainingMotion> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::ChainingMotion(chaining) => Some(chaining),
            _ => None,
        })
    }

    pub fn collision_mesh(&self) -> Option<&CollisionMesh> {
        self.chunks.iter().find_map(|chunk| match chunk {
            Chunk::CollisionMesh(collision) => Some(collision),
            _ => None,
        })
    }
}

/// Decodes a whole KMP file. Either every chunk decodes or nothing is
/// returned.
pub fn decode(bytes: &[u8]) -> Result<Container> {
    let mut cursor = ByteCursor::new(bytes);
    let mut chunks = Vec::new();

    while !cursor.is_empty() {
        let offset = cursor.position();
        let tag = cursor.read_u32()?;
        if tag == BEGIN_SENTINEL || tag == END_SENTINEL {
            continue;
        }
        let kind = ChunkKind::from_tag(tag).ok_or(Error::UnrecognizedChunkKind { offset, tag })?;
        let chunk = kmp_parser::read_chunk(&mut cursor, kind)?;
        debug!(
            "decoded {} chunk at offset {} ({} bytes)",
            kind,
            offset,
            cursor.position() - offset
        );
        chunks.push(chunk);
    }

    Ok(Container { chunks })
}

pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<Container> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let container = decode(&bytes)?;
    debug!(
        "{}: {} bytes, {} chunks",
        path.display(),
        bytes.len(),
        container.chunks.len()
    );
    Ok(container)
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec2, Vec3};

    use super::kmp_fixture::{bone_chain, KmpBuilder};
    use super::kmp_struct::*;
    use super::*;

    fn sample_model() -> Model {
        Model {
            vertices: vec![
                SkinnedVector {
                    value: Vec3::new(0.0, 0.0, 0.0),
                    skin_index: 0,
                },
                SkinnedVector {
                    value: Vec3::new(1.0, 0.0, 0.0),
                    skin_index: 0,
                },
                SkinnedVector {
                    value: Vec3::new(0.0, 1.0, 0.0),
                    skin_index: 1,
                },
            ],
            normals: vec![SkinnedVector {
                value: Vec3::Z,
                skin_index: 0,
            }],
            skins: vec![
                Skin {
                    bone_index: 0,
                    weights: [1.0, 0.0],
                },
                Skin {
                    bone_index: 1,
                    weights: [1.0, 0.0],
                },
            ],
            meshes: vec![SubMesh {
                texture: "body.tga".to_string(),
                vertices: (0..3)
                    .map(|i| MeshVertex {
                        vertex_index: i,
                        normal_index: 0,
                        skin_index: i.min(1),
                        uv: Vec2::new(i as f32 * 0.5, 0.25),
                    })
                    .collect(),
                triangles: vec![[0, 1, 2]],
                ..SubMesh::default()
            }],
        }
    }

    fn sample_animation() -> Animation {
        Animation {
            clips: vec![AnimationClip {
                duration: 1.0,
                frame_duration: 0.5,
                flag: 1,
                params: [0.0, 1.0, 2.0],
                events: vec![ClipEvent {
                    time: 0.5,
                    id: 7,
                    value: 1.0,
                }],
                secondary_events: Vec::new(),
                tracks: vec![Track {
                    bone_index: 1,
                    frames: vec![
                        Keyframe {
                            time: 0.0,
                            transform: Trs::default(),
                        },
                        Keyframe {
                            time: 0.5,
                            transform: Trs {
                                rotation: Quat::from_rotation_z(0.5),
                                ..Trs::default()
                            },
                        },
                    ],
                }],
            }],
        }
    }

    fn sample_chaining() -> ChainingMotion {
        ChainingMotion {
            motions: vec![ChainedMotion {
                duration: 2.0,
                segments: vec![ChainSegment {
                    clip_index: 0,
                    begin_time: 1.0,
                    playback_speed: 2.0,
                    aux_id: 3,
                    ..ChainSegment::default()
                }],
            }],
        }
    }

    fn sample_collision() -> CollisionMesh {
        CollisionMesh {
            groups: vec![CollisionGroup {
                parts: vec![CollisionPart {
                    center: Vec3::ONE,
                    radius: 2.0,
                    flags: 4,
                    vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                    faces: vec![CollisionFace {
                        indices: [0, 1, 2],
                        value: 0.5,
                    }],
                }],
            }],
        }
    }

    #[test]
    fn decodes_every_chunk_kind_in_order() {
        let skeleton = bone_chain(2);
        let bytes = KmpBuilder::new()
            .begin()
            .skeleton(&skeleton)
            .model(&sample_model())
            .animation(&sample_animation())
            .chaining_motion(&sample_chaining())
            .collision_mesh(&sample_collision())
            .end()
            .build();

        let container = decode(&bytes).unwrap();
        let kinds: Vec<_> = container.chunks.iter().map(Chunk::kind).collect();
        assert_eq!(kinds, ChunkKind::ALL.to_vec());
        assert_eq!(container.skeleton(), Some(&skeleton));
        assert_eq!(container.model(), Some(&sample_model()));
        assert_eq!(container.animation(), Some(&sample_animation()));
        assert_eq!(container.chaining_motion(), Some(&sample_chaining()));
        assert_eq!(container.collision_mesh(), Some(&sample_collision()));
    }

    #[test]
    fn empty_input_is_an_empty_container() {
        assert!(decode(&[]).unwrap().chunks.is_empty());
        let sentinels = KmpBuilder::new().begin().end().build();
        assert!(decode(&sentinels).unwrap().chunks.is_empty());
    }

    #[test]
    fn second_skeleton_table_is_detected() {
        let mut skeleton = bone_chain(3);
        skeleton.absolute_transforms = Some(skeleton.transforms.clone());

        let at_eof = KmpBuilder::new().skeleton(&skeleton).build();
        assert_eq!(decode(&at_eof).unwrap().skeleton(), Some(&skeleton));

        let before_model = KmpBuilder::new()
            .skeleton(&skeleton)
            .model(&Model::default())
            .build();
        let container = decode(&before_model).unwrap();
        assert_eq!(container.skeleton(), Some(&skeleton));
        assert!(container.model().is_some());

        let single = bone_chain(3);
        let before_end = KmpBuilder::new().skeleton(&single).end().build();
        assert_eq!(decode(&before_end).unwrap().skeleton(), Some(&single));
    }

    #[test]
    fn unknown_tag_is_rejected_with_its_offset() {
        let bytes = KmpBuilder::new().begin().u32(0x1234_5678).build();
        match decode(&bytes) {
            Err(Error::UnrecognizedChunkKind { offset, tag }) => {
                assert_eq!(offset, 4);
                assert_eq!(tag, 0x1234_5678);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bad_chunk_header_is_rejected() {
        let bytes = KmpBuilder::new()
            .u32(ChunkKind::Model.tag())
            .u32(ChunkKind::Model.tag())
            .build();
        match decode(&bytes) {
            Err(Error::MalformedChunkHeader {
                offset,
                expected,
                actual,
            }) => {
                assert_eq!(offset, 4);
                assert_eq!(expected, 0x6B4D_0008);
                assert_eq!(actual, 0x6B4D_0000);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn oversized_array_count_is_truncation() {
        // Claims 1000 vertices but supplies none.
        let bytes = KmpBuilder::new()
            .chunk_start(ChunkKind::Model)
            .i32(1000)
            .i32(0)
            .i32(0)
            .build();
        assert!(matches!(
            decode(&bytes),
            Err(Error::TruncatedInput { needed: 16000, .. })
        ));

        let clips = KmpBuilder::new()
            .chunk_start(ChunkKind::Animation)
            .i32(i32::MAX)
            .build();
        assert!(matches!(decode(&clips), Err(Error::TruncatedInput { .. })));
    }

    #[test]
    fn negative_count_is_rejected() {
        let bytes = KmpBuilder::new()
            .chunk_start(ChunkKind::ChainingMotion)
            .i32(-3)
            .build();
        assert!(matches!(
            decode(&bytes),
            Err(Error::InvalidCount { count: -3, .. })
        ));
    }

    #[test]
    fn truncated_payload_returns_no_partial_result() {
        let bytes = KmpBuilder::new()
            .skeleton(&bone_chain(2))
            .model(&sample_model())
            .build();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(decode(cut), Err(Error::TruncatedInput { .. })));
    }

    #[test]
    fn invalid_texture_name_is_rejected() {
        let bytes = KmpBuilder::new()
            .chunk_start(ChunkKind::Model)
            .i32(0)
            .i32(0)
            .i32(0)
            .i32(1)
            .i32(0)
            .i32(0);
        let mut bytes = (0..17).fold(bytes, |b, _| b.f32(0.0)).build();
        bytes.extend_from_slice(&[0xFF, 0xFE, 0x00]);
        assert!(matches!(
            decode(&bytes),
            Err(Error::InvalidString { .. })
        ));
    }

    #[test]
    fn decode_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.kmp");
        let bytes = KmpBuilder::new().begin().skeleton(&bone_chain(4)).end().build();
        std::fs::write(&path, bytes).unwrap();

        let container = decode_file(&path).unwrap();
        assert_eq!(container.skeleton().map(Skeleton::bone_count), Some(4));

        assert!(matches!(
            decode_file(dir.path().join("missing.kmp")),
            Err(Error::Io(_))
        ));
    }
}
