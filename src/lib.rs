//! Conversion of KMP game-asset containers to glTF 2.0.
//!
//! `kmp::decode` reads the chunked container, `exporter::Exporter` turns it
//! into a `gltf::GltfDocument`, and `gltf::gltf_codec` writes that document
//! as a GLB file or as `.gltf` JSON with sibling buffers.

pub mod animation;
pub mod binary;
pub mod config;
pub mod error;
pub mod exporter;
pub mod gltf;
pub mod kmp;
pub mod skeleton;
pub mod texture;

pub use config::{ExportConfig, OutputFormat};
pub use error::{Error, Result};
pub use exporter::Exporter;
pub use gltf::GltfDocument;
pub use skeleton::SkeletonVariant;
