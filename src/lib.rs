//! This crate renders heightfield terrains with geomipmapping.
//!
//! # Background
//! A terrain is a square grid of height samples. Drawing every sample as a vertex does
//! not scale, so the grid is split into equally sized square patches, each of which
//! can be drawn at several detail levels. Detail level `d` only uses every `2^d`-th
//! sample along both axes.
//!
//! ## Selecting the detail
//! A static quadtree sits on top of the patch grid, see the [`quadtree`] module.
//! Every frame it is traversed towards the camera. Nodes close to the camera are
//! subdivided down to single patches drawn with full detail, while distant nodes are
//! drawn as one coarse block. Patches outside of the view frustum are culled.
//!
//! ## Hiding the seams
//! Neighbouring patches of different detail do not share all of their edge vertices,
//! which opens cracks between them. Instead of stitching the edges, every patch hangs
//! a vertical skirt below its border that covers those cracks, see the
//! [`index_levels`] module.
//!
//! ## Drawing
//! The [`Landscape`](landscape::Landscape) does not talk to a graphics API. It records
//! its uploads and draw calls through a [`TerrainRenderer`](render::TerrainRenderer)
//! provided by the application.

pub use crate::plugin::GeomipmapPlugin;

pub mod config;
pub mod error;
pub mod height_map;
pub mod index_levels;
pub mod landscape;
pub mod patch;
pub mod plugin;
pub mod quadtree;
pub mod render;
pub mod viewer;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::LandscapeConfig,
        error::{TerrainError, TerrainResult},
        height_map::{HeightMap, HeightSource},
        landscape::Landscape,
        plugin::TerrainView,
        quadtree::SelectionPolicy,
        render::{
            IndexBufferDescriptor, IndexBufferId, TerrainRenderable, TerrainRenderer,
            TerrainVertex, VertexWindow,
        },
        viewer::{TerrainViewer, Viewer},
        GeomipmapPlugin,
    };
}
