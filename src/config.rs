use crate::{
    error::{TerrainError, TerrainResult},
    quadtree::SelectionPolicy,
};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// Describes a geomipmapped landscape.
///
/// The heightmap is a square grid of `map_size` samples per side, which is split into
/// `patches_per_side()²` patches of `patch_size` cells each. One grid cell spans
/// `scale.x` by `scale.z` world units, raw height samples are multiplied by `scale.y`.
///
/// Usually loaded from a RON file:
///
/// ```ron
/// (
///     height_source: "assets/terrain/height.raw",
///     map_size: 256,
///     patch_size: 16,
///     scale: (4.0, 0.5, 4.0),
///     selection: Distance(lod_factor: 2.0),
/// )
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LandscapeConfig {
    pub height_source: PathBuf,
    pub translation: [f32; 3],
    /// Rotation quaternion in `x, y, z, w` order.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub map_size: u32,
    pub patch_size: u32,
    pub smoothing_passes: u32,
    /// Whether patches outside the view frustum are culled.
    pub clip: bool,
    /// How far the skirt ring hangs below the patch border, in height units.
    pub skirt_depth: f32,
    pub selection: SelectionPolicy,
    /// Side length in cells of the square touched by a single displacement.
    pub displacement_footprint: u32,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            height_source: PathBuf::new(),
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            map_size: 256,
            patch_size: 16,
            smoothing_passes: 3,
            clip: true,
            skirt_depth: 1.0,
            selection: SelectionPolicy::default(),
            displacement_footprint: 20,
        }
    }
}

impl LandscapeConfig {
    pub fn new(height_source: impl Into<PathBuf>, map_size: u32, patch_size: u32) -> Self {
        Self {
            height_source: height_source.into(),
            map_size,
            patch_size,
            ..default()
        }
    }

    pub fn from_ron(source: &str) -> TerrainResult<Self> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> TerrainResult<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_ron(&source)
    }

    /// Rejects every configuration a landscape can not be built from.
    pub fn validate(&self) -> TerrainResult<()> {
        let invalid = |message: String| Err(TerrainError::Configuration(message));

        if self.map_size < 2 {
            return invalid(format!("map size {} is smaller than 2", self.map_size));
        }
        if self.patch_size == 0 || !self.patch_size.is_power_of_two() {
            return invalid(format!(
                "patch size {} is not a power of two",
                self.patch_size
            ));
        }
        if self.map_size % self.patch_size != 0 {
            return invalid(format!(
                "map size {} is not divisible by patch size {}",
                self.map_size, self.patch_size
            ));
        }
        if self.level_count() == 0 {
            return invalid("landscape has no detail levels".into());
        }
        if self.scale.iter().any(|&s| !(s > 0.0)) {
            return invalid(format!("scale {:?} is not strictly positive", self.scale));
        }
        if self.skirt_depth < 0.0 {
            return invalid(format!("skirt depth {} is negative", self.skirt_depth));
        }

        Ok(())
    }

    #[inline]
    pub fn patches_per_side(&self) -> u32 {
        self.map_size / self.patch_size
    }

    /// Number of precomputed index buffers, one per detail level.
    #[inline]
    pub fn level_count(&self) -> u32 {
        self.map_size / self.patch_size
    }

    #[inline]
    pub fn scale(&self) -> Vec3 {
        Vec3::from_array(self.scale)
    }

    pub fn transform(&self) -> Transform {
        Transform {
            translation: Vec3::from_array(self.translation),
            rotation: Quat::from_array(self.rotation).normalize(),
            scale: self.scale(),
        }
    }
}
