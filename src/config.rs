use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::skeleton::SkeletonVariant;
use crate::texture::ColorEncoding;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Single binary container.
    #[default]
    Glb,
    /// `.gltf` JSON plus sibling buffer files.
    Gltf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Glb => "glb",
            OutputFormat::Gltf => "gltf",
        }
    }
}

/// Export options, read from JSON. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ExportConfig {
    pub format: OutputFormat,
    /// Forces a skeleton convention instead of detecting it per file.
    pub skeleton_variant: Option<SkeletonVariant>,
    pub texture_encoding: ColorEncoding,
    pub embed_textures: bool,
    pub include_collision_meshes: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Glb,
            skeleton_variant: None,
            texture_encoding: ColorEncoding::Rgb,
            embed_textures: true,
            include_collision_meshes: false,
        }
    }
}

impl ExportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
