//! The interface between the landscape and the GPU.
//!
//! The landscape never talks to a graphics API directly. Instead it records its work
//! through a [`TerrainRenderer`], which owns the actual buffers, effects and draw calls.

use bevy::{math::Vec3, render::render_resource::IndexFormat};
use bytemuck::{Pod, Zeroable};

/// Name of the uniform array the displacement map is uploaded to.
pub const DISPLACEMENT_UNIFORM: &str = "displacement";

/// A single vertex of the shared landscape vertex buffer.
///
/// Positions are in landscape local space: x and z in grid cells, y in world units.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// The range of the vertex buffer a single patch draws from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexWindow {
    pub base_vertex: u32,
    pub vertex_count: u32,
}

/// Handle to an index buffer owned by a [`TerrainRenderer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexBufferId(pub u32);

pub struct IndexBufferDescriptor<'a> {
    pub label: &'a str,
    pub contents: &'a [u8],
    pub format: IndexFormat,
    pub index_count: u32,
}

/// GPU resources and draw calls, supplied by the embedding application.
pub trait TerrainRenderer {
    fn create_index_buffer(&mut self, descriptor: &IndexBufferDescriptor) -> IndexBufferId;

    /// Replaces the contents of the landscape vertex buffer.
    fn upload_vertices(&mut self, vertices: &[TerrainVertex]);

    fn set_uniform(&mut self, name: &str, values: &[f32]);

    /// Binds the terrain effect and applies all of its passes.
    fn bind_effect(&mut self);

    fn draw_indexed(&mut self, index_buffer: IndexBufferId, window: VertexWindow, index_count: u32);
}

bitflags::bitflags! {
/// GPU resident data that is out of date and has to be uploaded before the next draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingUploads: u32 {
    const INDEX_BUFFERS = 1 << 0;
    const VERTICES      = 1 << 1;
    const DISPLACEMENT  = 1 << 2;
}
}

/// Something that can be drawn as a heightfield.
pub trait TerrainRenderable {
    /// Uploads the index buffers of every detail level.
    fn init_index_buffers<R: TerrainRenderer>(&mut self, renderer: &mut R);

    /// Draws the currently selected patches.
    fn draw_indexed<R: TerrainRenderer>(&mut self, renderer: &mut R);

    /// The world space height below the position.
    fn sample(&self, position: Vec3) -> f32;
}
