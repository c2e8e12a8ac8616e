//! Animation timelines: direct clips and chained motions merged from
//! several clip segments.

use glam::{Quat, Vec3};
use gltf_json as json;
use gltf_json::animation::{Channel, Interpolation, Property, Sampler, Target};
use gltf_json::validation::Checked::Valid;
use tracing::debug;

use crate::error::{Error, Result};
use crate::gltf::{index, push, AccessorOptions, BufferAllocator};
use crate::kmp::kmp_struct::{AnimationClip, ChainedMotion, Keyframe};
use crate::skeleton::{keyframe_trs, SkeletonVariant};

/// All frames one bone receives from a chained motion, already converted to
/// local transforms and placed on the motion's timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTrack {
    pub bone: usize,
    pub frames: Vec<Keyframe>,
}

fn local_frames(
    bone: usize,
    frames: &[Keyframe],
    variant: SkeletonVariant,
) -> Result<Vec<Keyframe>> {
    frames
        .iter()
        .enumerate()
        .map(|(frame, keyframe)| {
            keyframe_trs(variant, &keyframe.transform)
                .map(|transform| Keyframe {
                    time: keyframe.time,
                    transform,
                })
                .ok_or(Error::KeyframeDecompositionFailed { bone, frame })
        })
        .collect()
}

fn node_for_bone(bone_nodes: &[usize], bone: usize) -> Result<usize> {
    bone_nodes.get(bone).copied().ok_or(Error::IndexOutOfRange {
        what: "track bone",
        index: bone as i64,
        len: bone_nodes.len(),
    })
}

/// Writes the time and TRS accessors of one bone and wires three LINEAR
/// samplers to its node. Translation, rotation and scale share one input.
fn emit_track(
    allocator: &BufferAllocator,
    animation: &mut json::Animation,
    name: &str,
    node: usize,
    frames: &[Keyframe],
) -> Result<()> {
    let times: Vec<f32> = frames.iter().map(|frame| frame.time).collect();
    let translations: Vec<Vec3> = frames.iter().map(|f| f.transform.translation).collect();
    let rotations: Vec<Quat> = frames.iter().map(|f| f.transform.rotation).collect();
    let scales: Vec<Vec3> = frames.iter().map(|f| f.transform.scale).collect();

    let named = |suffix: &str| AccessorOptions {
        name: Some(format!("{name}/node{node}/{suffix}")),
        ..AccessorOptions::default()
    };
    let input = index(allocator.add_accessor_with(&times, named("time"))?);
    let outputs = [
        (
            Property::Translation,
            allocator.add_accessor_with(&translations, named("translation"))?,
        ),
        (
            Property::Rotation,
            allocator.add_accessor_with(&rotations, named("rotation"))?,
        ),
        (
            Property::Scale,
            allocator.add_accessor_with(&scales, named("scale"))?,
        ),
    ];

    for (path, output) in outputs {
        let sampler = push(
            &mut animation.samplers,
            Sampler {
                extensions: Default::default(),
                extras: Default::default(),
                input,
                interpolation: Valid(Interpolation::Linear),
                output: index(output),
            },
        );
        animation.channels.push(Channel {
            sampler,
            target: Target {
                extensions: Default::default(),
                extras: Default::default(),
                node: index(node),
                path: Valid(path),
            },
            extensions: Default::default(),
            extras: Default::default(),
        });
    }
    Ok(())
}

fn named_animation(name: &str) -> json::Animation {
    json::Animation {
        extensions: Default::default(),
        extras: Default::default(),
        channels: Vec::new(),
        name: Some(name.to_string()),
        samplers: Vec::new(),
    }
}

/// One glTF animation per clip; tracks without frames contribute nothing.
pub fn export_direct_clip(
    allocator: &BufferAllocator,
    clip: &AnimationClip,
    name: &str,
    bone_nodes: &[usize],
    variant: SkeletonVariant,
) -> Result<json::Animation> {
    let mut animation = named_animation(name);
    for track in clip.tracks.iter().filter(|track| !track.frames.is_empty()) {
        let bone = usize::try_from(track.bone_index).map_err(|_| Error::IndexOutOfRange {
            what: "track bone",
            index: i64::from(track.bone_index),
            len: bone_nodes.len(),
        })?;
        let node = node_for_bone(bone_nodes, bone)?;
        let frames = local_frames(bone, &track.frames, variant)?;
        emit_track(allocator, &mut animation, name, node, &frames)?;
    }
    debug!(
        "animation {}: {} tracks, {} channels",
        name,
        clip.tracks.len(),
        animation.channels.len()
    );
    Ok(animation)
}

/// Concatenates, per bone, the frames every segment of chained motion
/// `motion` contributes, with `time = begin_time + frame_time / speed`.
///
/// Frames keep segment order; overlapping segments produce non-monotonic
/// times. Bones no segment animates are left out.
pub fn merge_chained_tracks(
    motion: usize,
    chained: &ChainedMotion,
    clips: &[AnimationClip],
    bone_count: usize,
    variant: SkeletonVariant,
) -> Result<Vec<MergedTrack>> {
    let mut segments = Vec::with_capacity(chained.segments.len());
    for (index, segment) in chained.segments.iter().enumerate() {
        let clip = usize::try_from(segment.clip_index)
            .ok()
            .and_then(|clip| clips.get(clip))
            .ok_or(Error::IndexOutOfRange {
                what: "segment clip",
                index: i64::from(segment.clip_index),
                len: clips.len(),
            })?;
        let speed = segment.playback_speed;
        if speed == 0.0 || !speed.is_finite() {
            return Err(Error::InvalidPlaybackSpeed {
                motion,
                segment: index,
                speed,
            });
        }
        segments.push((segment, clip));
    }

    let mut merged = Vec::new();
    for bone in 0..bone_count {
        let mut frames = Vec::new();
        for (segment, clip) in &segments {
            let Some(track) = clip.track_for_bone(bone) else {
                continue;
            };
            frames.extend(track.frames.iter().map(|frame| Keyframe {
                time: segment.begin_time + frame.time / segment.playback_speed,
                transform: frame.transform,
            }));
        }
        if !frames.is_empty() {
            let frames = local_frames(bone, &frames, variant)?;
            merged.push(MergedTrack { bone, frames });
        }
    }
    Ok(merged)
}

pub fn export_chained_clip(
    allocator: &BufferAllocator,
    motion: usize,
    chained: &ChainedMotion,
    clips: &[AnimationClip],
    name: &str,
    bone_nodes: &[usize],
    variant: SkeletonVariant,
) -> Result<json::Animation> {
    let tracks = merge_chained_tracks(motion, chained, clips, bone_nodes.len(), variant)?;
    let mut animation = named_animation(name);
    for track in &tracks {
        let node = node_for_bone(bone_nodes, track.bone)?;
        emit_track(allocator, &mut animation, name, node, &track.frames)?;
    }
    debug!(
        "animation {}: {} segments merged into {} tracks",
        name,
        chained.segments.len(),
        tracks.len()
    );
    Ok(animation)
}
