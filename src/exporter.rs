//! Builds a glTF document from a decoded KMP container.

use std::collections::BTreeMap;
use std::path::Path;

use glam::{Mat4, Quat, Vec2, Vec3};
use gltf_json as json;
use gltf_json::buffer::Target;
use gltf_json::mesh::{Mode, Primitive, Semantic};
use gltf_json::validation::Checked::Valid;
use tracing::{info, warn};

use crate::animation::{export_chained_clip, export_direct_clip};
use crate::config::ExportConfig;
use crate::error::{Error, Result};
use crate::gltf::{empty_root, index, push, AccessorOptions, BufferAllocator, GltfDocument};
use crate::kmp::kmp_struct::{CollisionPart, Model, Skeleton, SubMesh, Trs};
use crate::kmp::Container;
use crate::skeleton::{BindPoseResolver, SkeletonVariant};
use crate::texture::{load_image, PngRasterEncoder, RasterEncoder};

/// Node transform components closer than this to the identity are omitted.
const TRS_EPSILON: f32 = 1e-6;

fn checked_index(what: &'static str, index: i64, len: usize) -> Result<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(Error::IndexOutOfRange { what, index, len })
}

fn named_node(name: String) -> json::Node {
    json::Node {
        camera: None,
        children: None,
        extensions: Default::default(),
        extras: Default::default(),
        matrix: None,
        mesh: None,
        name: Some(name),
        rotation: None,
        scale: None,
        skin: None,
        translation: None,
        weights: None,
    }
}

fn node_from_trs(name: String, trs: &Trs) -> json::Node {
    json::Node {
        translation: (!trs.translation.abs_diff_eq(Vec3::ZERO, TRS_EPSILON))
            .then(|| trs.translation.to_array()),
        rotation: (!trs.rotation.abs_diff_eq(Quat::IDENTITY, TRS_EPSILON))
            .then(|| json::scene::UnitQuaternion(trs.rotation.to_array())),
        scale: (!trs.scale.abs_diff_eq(Vec3::ONE, TRS_EPSILON)).then(|| trs.scale.to_array()),
        ..named_node(name)
    }
}

fn add_child(root: &mut json::Root, parent: usize, child: usize) {
    root.nodes[parent]
        .children
        .get_or_insert_with(Vec::new)
        .push(index(child));
}

fn new_mesh(name: &str, primitives: Vec<Primitive>) -> json::Mesh {
    json::Mesh {
        extensions: Default::default(),
        extras: Default::default(),
        name: Some(name.to_string()),
        primitives,
        weights: None,
    }
}

fn triangle_primitive(
    attributes: BTreeMap<json::validation::Checked<Semantic>, json::Index<json::Accessor>>,
    indices: usize,
) -> Primitive {
    Primitive {
        attributes,
        extensions: Default::default(),
        extras: Default::default(),
        indices: Some(index(indices)),
        material: None,
        mode: Valid(Mode::Triangles),
        targets: None,
    }
}

/// One conversion of a container; `export` may be called more than once.
pub struct Exporter<'a> {
    container: &'a Container,
    config: ExportConfig,
    encoder: Box<dyn RasterEncoder>,
}

impl<'a> Exporter<'a> {
    pub fn new(container: &'a Container, config: ExportConfig) -> Self {
        Self {
            container,
            config,
            encoder: Box::new(PngRasterEncoder),
        }
    }

    pub fn with_encoder(mut self, encoder: Box<dyn RasterEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    fn variant(&self) -> SkeletonVariant {
        self.config.skeleton_variant.unwrap_or_default()
    }

    /// Texture filenames are resolved against `texture_root`.
    ///
    /// Accessors are written in a fixed order: inverse bind matrices, then
    /// the model mesh, then chained motions and direct clips, then
    /// collision meshes.
    pub fn export(&self, texture_root: &Path) -> Result<GltfDocument> {
        let allocator = BufferAllocator::new();
        let mut root = empty_root();

        let root_node = push(&mut root.nodes, named_node("root".to_string()));
        root.scenes[0].nodes.push(root_node);
        let root_node = root_node.value();

        let variant = self.variant();
        let bone_nodes = match self.container.skeleton() {
            Some(skeleton) => {
                self.export_skeleton(&allocator, &mut root, root_node, skeleton, variant)?
            }
            None => Vec::new(),
        };
        let joint_count = self.container.skeleton().map(|_| bone_nodes.len());

        if let Some(model) = self.container.model() {
            let mesh =
                self.export_model(&allocator, &mut root, model, joint_count, texture_root)?;
            root.nodes[root_node].mesh = Some(mesh);
        }

        if self.container.skeleton().is_some() {
            self.export_animations(&allocator, &mut root, &bone_nodes, variant)?;
        }

        if self.config.include_collision_meshes {
            self.export_collision(&allocator, &mut root, root_node)?;
        }

        info!(
            "exported {} nodes, {} meshes, {} animations, {} accessors",
            root.nodes.len(),
            root.meshes.len(),
            root.animations.len(),
            allocator.accessor_count()
        );
        Ok(allocator.into_document(root))
    }

    /// Adds one node per bone plus the skin, and returns the bone nodes.
    fn export_skeleton(
        &self,
        allocator: &BufferAllocator,
        root: &mut json::Root,
        root_node: usize,
        skeleton: &Skeleton,
        variant: SkeletonVariant,
    ) -> Result<Vec<usize>> {
        let resolver = BindPoseResolver::new(skeleton, variant)?;

        let mut bone_nodes = Vec::with_capacity(skeleton.bone_count());
        for bone in 0..skeleton.bone_count() {
            let trs = resolver.local_trs(bone)?;
            let node = push(&mut root.nodes, node_from_trs(format!("Bone{bone}"), &trs));
            bone_nodes.push(node.value());
        }
        for (bone, &parent) in skeleton.parents.iter().enumerate() {
            let parent_node = match parent {
                -1 => root_node,
                parent => bone_nodes[parent as usize],
            };
            add_child(root, parent_node, bone_nodes[bone]);
        }

        let inverse_binds: Vec<Mat4> = resolver.inverse_bind_matrices()?;
        let inverse_bind_matrices = allocator.add_accessor_with(
            &inverse_binds,
            AccessorOptions {
                name: Some("skin/inverseBindMatrices".to_string()),
                ..AccessorOptions::default()
            },
        )?;
        let skin = push(
            &mut root.skins,
            json::Skin {
                extensions: Default::default(),
                extras: Default::default(),
                inverse_bind_matrices: Some(index(inverse_bind_matrices)),
                joints: bone_nodes.iter().map(|&node| index(node)).collect(),
                name: Some("skin".to_string()),
                skeleton: None,
            },
        );
        root.nodes[root_node].skin = Some(skin);
        Ok(bone_nodes)
    }

    /// Chained motions first, then every clip on its own.
    fn export_animations(
        &self,
        allocator: &BufferAllocator,
        root: &mut json::Root,
        bone_nodes: &[usize],
        variant: SkeletonVariant,
    ) -> Result<()> {
        let clips = self
            .container
            .animation()
            .map(|animation| animation.clips.as_slice())
            .unwrap_or_default();
        if let Some(chaining) = self.container.chaining_motion() {
            for (index, chained) in chaining.motions.iter().enumerate() {
                let animation = export_chained_clip(
                    allocator,
                    index,
                    chained,
                    clips,
                    &format!("chain{index}"),
                    bone_nodes,
                    variant,
                )?;
                root.animations.push(animation);
            }
        }
        for (index, clip) in clips.iter().enumerate() {
            let animation = export_direct_clip(
                allocator,
                clip,
                &format!("single{index}"),
                bone_nodes,
                variant,
            )?;
            root.animations.push(animation);
        }
        Ok(())
    }

    /// `joint_count` is `None` for a model without a skeleton.
    fn export_model(
        &self,
        allocator: &BufferAllocator,
        root: &mut json::Root,
        model: &Model,
        joint_count: Option<usize>,
        texture_root: &Path,
    ) -> Result<json::Index<json::Mesh>> {
        let mut primitives = Vec::with_capacity(model.meshes.len());
        for (mesh_index, submesh) in model.meshes.iter().enumerate() {
            let material =
                self.export_material(allocator, root, mesh_index, submesh, texture_root)?;
            let mut primitive =
                export_primitive(allocator, model, mesh_index, submesh, joint_count)?;
            primitive.material = Some(material);
            primitives.push(primitive);
        }
        Ok(push(&mut root.meshes, new_mesh("model", primitives)))
    }

    fn export_material(
        &self,
        allocator: &BufferAllocator,
        root: &mut json::Root,
        mesh_index: usize,
        submesh: &SubMesh,
        texture_root: &Path,
    ) -> Result<json::Index<json::Material>> {
        let filename = submesh.texture.trim();
        let mut material = json::Material {
            name: Some(if filename.is_empty() {
                format!("material{mesh_index}")
            } else {
                filename.to_string()
            }),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                metallic_factor: json::material::StrengthFactor(0.0),
                ..Default::default()
            },
            ..Default::default()
        };

        if self.config.embed_textures && !filename.is_empty() {
            let texture = match allocator.find_texture(filename) {
                Some(texture) => Some(texture),
                None => match load_image(texture_root.join(filename)) {
                    Ok(image) => Some(allocator.add_texture(
                        filename,
                        &image,
                        self.config.texture_encoding,
                        self.encoder.as_ref(),
                    )?),
                    Err(err) => {
                        warn!("texture {} not embedded: {}", filename, err);
                        None
                    }
                },
            };
            material.pbr_metallic_roughness.base_color_texture =
                texture.map(|texture| json::texture::Info {
                    index: index(texture),
                    tex_coord: 0,
                    extensions: None,
                    extras: Default::default(),
                });
        }

        Ok(push(&mut root.materials, material))
    }

    /// One `Collision{g}` child of the root per group with exportable parts.
    fn export_collision(
        &self,
        allocator: &BufferAllocator,
        root: &mut json::Root,
        root_node: usize,
    ) -> Result<()> {
        let Some(collision) = self.container.collision_mesh() else {
            return Ok(());
        };
        for (group_index, group) in collision.groups.iter().enumerate() {
            let primitives = group
                .parts
                .iter()
                .enumerate()
                .filter_map(|(part_index, part)| {
                    export_collision_part(allocator, group_index, part_index, part).transpose()
                })
                .collect::<Result<Vec<_>>>()?;
            if primitives.is_empty() {
                continue;
            }
            let mesh = push(&mut root.meshes, new_mesh("collision", primitives));
            let node = push(
                &mut root.nodes,
                json::Node {
                    mesh: Some(mesh),
                    ..named_node(format!("Collision{group_index}"))
                },
            );
            add_child(root, root_node, node.value());
        }
        Ok(())
    }
}

fn export_primitive(
    allocator: &BufferAllocator,
    model: &Model,
    mesh_index: usize,
    submesh: &SubMesh,
    joint_count: Option<usize>,
) -> Result<Primitive> {
    let count = submesh.vertices.len();
    let mut positions = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);
    let mut uvs: Vec<Vec2> = Vec::with_capacity(count);
    let mut joints: Vec<[u16; 4]> = Vec::with_capacity(count);

    for vertex in &submesh.vertices {
        let position = checked_index(
            "vertex",
            i64::from(vertex.vertex_index),
            model.vertices.len(),
        )?;
        let normal = checked_index(
            "normal",
            i64::from(vertex.normal_index),
            model.normals.len(),
        )?;
        positions.push(model.vertices[position].value);
        normals.push(model.normals[normal].value.normalize_or_zero());
        uvs.push(vertex.uv);

        if let Some(joint_count) = joint_count {
            let skin = checked_index("skin", i64::from(vertex.skin_index), model.skins.len())?;
            let bone = model.skins[skin].bone_index;
            let joint = checked_index("joint", i64::from(bone), joint_count)?;
            let joint = u16::try_from(joint).map_err(|_| Error::IndexOutOfRange {
                what: "joint",
                index: i64::from(bone),
                len: usize::from(u16::MAX),
            })?;
            joints.push([joint, 0, 0, 0]);
        }
    }

    // Corners are stored as 16-bit words; read them unsigned.
    let mut indices: Vec<u16> = Vec::with_capacity(submesh.triangles.len() * 3);
    for corner in submesh.triangles.iter().flatten() {
        let corner = *corner as u16;
        checked_index("triangle vertex", i64::from(corner), count)?;
        indices.push(corner);
    }

    let named = |attribute: &str, target| AccessorOptions {
        name: Some(format!("mesh{mesh_index}/{attribute}")),
        target: Some(target),
        ..AccessorOptions::default()
    };
    let array = Target::ArrayBuffer;

    let mut attributes = BTreeMap::new();
    let position = allocator.add_accessor_with(&positions, named("POSITION", array))?;
    attributes.insert(Valid(Semantic::Positions), index(position));
    let normal = allocator.add_accessor_with(&normals, named("NORMAL", array))?;
    attributes.insert(Valid(Semantic::Normals), index(normal));
    let uv = allocator.add_accessor_with(&uvs, named("TEXCOORD_0", array))?;
    attributes.insert(Valid(Semantic::TexCoords(0)), index(uv));
    if joint_count.is_some() {
        let weights = vec![[1.0f32, 0.0, 0.0, 0.0]; count];
        let joints = allocator.add_accessor_with(&joints, named("JOINTS_0", array))?;
        attributes.insert(Valid(Semantic::Joints(0)), index(joints));
        let weights = allocator.add_accessor_with(&weights, named("WEIGHTS_0", array))?;
        attributes.insert(Valid(Semantic::Weights(0)), index(weights));
    }
    let indices = allocator.add_accessor_with(
        &indices,
        named("indices", Target::ElementArrayBuffer),
    )?;

    Ok(triangle_primitive(attributes, indices))
}

/// `Ok(None)` when the part references a vertex it does not have.
fn export_collision_part(
    allocator: &BufferAllocator,
    group: usize,
    part_index: usize,
    part: &CollisionPart,
) -> Result<Option<Primitive>> {
    let mut indices: Vec<u32> = Vec::with_capacity(part.faces.len() * 3);
    for face in &part.faces {
        for &vertex in &face.indices {
            match u32::try_from(vertex) {
                Ok(vertex) if (vertex as usize) < part.vertices.len() => indices.push(vertex),
                _ => {
                    warn!(
                        "collision group {} part {}: face references vertex {} of {}, skipped",
                        group,
                        part_index,
                        vertex,
                        part.vertices.len()
                    );
                    return Ok(None);
                }
            }
        }
    }

    let named = |attribute: &str, target| AccessorOptions {
        name: Some(format!("collision{group}/part{part_index}/{attribute}")),
        target: Some(target),
        ..AccessorOptions::default()
    };
    let position = allocator.add_accessor_with(
        &part.vertices,
        named("POSITION", Target::ArrayBuffer),
    )?;
    let indices = allocator.add_accessor_with(
        &indices,
        named("indices", Target::ElementArrayBuffer),
    )?;
    Ok(Some(triangle_primitive(
        BTreeMap::from([(Valid(Semantic::Positions), index(position))]),
        indices,
    )))
}
