//! Precomputed index buffers for every detail level of a patch.
//!
//! All patches share the same vertex layout, so one index buffer per detail level
//! suffices for the whole landscape. A patch of size `n` has `(n + 1)²` surface
//! vertices in row major order, followed by a skirt ring of `4 (n + 1)` vertices that
//! hang below the border. The ring runs along the bottom edge (x increasing), the
//! right edge (z increasing), the top edge (x decreasing) and the left edge
//! (z decreasing), each edge with its own `n + 1` vertices.
//!
//! Detail level `d` walks the grid with a step of `min(2^d, n)` cells.

use bevy::{
    math::UVec2,
    render::{mesh::Indices, render_resource::IndexFormat},
};
use bytemuck::cast_slice;
use itertools::iproduct;

#[inline]
pub fn surface_vertex_count(patch_size: u32) -> u32 {
    (patch_size + 1) * (patch_size + 1)
}

#[inline]
pub fn skirt_vertex_count(patch_size: u32) -> u32 {
    4 * (patch_size + 1)
}

#[inline]
pub fn vertex_count(patch_size: u32) -> u32 {
    surface_vertex_count(patch_size) + skirt_vertex_count(patch_size)
}

/// The grid step used by a detail level.
#[inline]
pub fn step_size(patch_size: u32, detail: u32) -> u32 {
    1u32.checked_shl(detail).unwrap_or(u32::MAX).min(patch_size)
}

/// The surface vertex a skirt vertex hangs below, in patch local grid coordinates.
pub fn skirt_anchor(patch_size: u32, skirt_index: u32) -> UVec2 {
    let edge = skirt_index / (patch_size + 1);
    let t = skirt_index % (patch_size + 1);

    edge_vertex(patch_size, edge, t)
}

#[inline]
fn edge_vertex(patch_size: u32, edge: u32, t: u32) -> UVec2 {
    match edge {
        0 => UVec2::new(t, 0),
        1 => UVec2::new(patch_size, t),
        2 => UVec2::new(patch_size - t, patch_size),
        3 => UVec2::new(0, patch_size - t),
        _ => unreachable!("a patch has four edges"),
    }
}

#[inline]
fn add_quad(indices: &mut Vec<u32>, top_left: u32, top_right: u32, lower_left: u32, lower_right: u32) {
    indices.extend_from_slice(&[
        top_left,
        lower_right,
        lower_left,
        top_left,
        top_right,
        lower_right,
    ]);
}

fn generate_indices(patch_size: u32, step: u32) -> Vec<u32> {
    let row = patch_size + 1;
    let surface = |vertex: UVec2| vertex.x + vertex.y * row;
    let skirt_start = surface_vertex_count(patch_size);
    let quads = patch_size / step;

    let mut indices = Vec::with_capacity((6 * quads * quads + 24 * quads) as usize);

    for (z, x) in iproduct!(
        (0..patch_size).step_by(step as usize),
        (0..patch_size).step_by(step as usize)
    ) {
        add_quad(
            &mut indices,
            surface(UVec2::new(x, z + step)),
            surface(UVec2::new(x + step, z + step)),
            surface(UVec2::new(x, z)),
            surface(UVec2::new(x + step, z)),
        );
    }

    for (edge, t) in iproduct!(0..4, (0..patch_size).step_by(step as usize)) {
        let ring = skirt_start + edge * row;

        add_quad(
            &mut indices,
            surface(edge_vertex(patch_size, edge, t)),
            surface(edge_vertex(patch_size, edge, t + step)),
            ring + t,
            ring + t + step,
        );
    }

    indices
}

/// The index buffer of a single detail level.
#[derive(Clone, Debug)]
pub struct IndexLevel {
    step: u32,
    indices: Indices,
}

impl IndexLevel {
    fn new(patch_size: u32, detail: u32) -> Self {
        let step = step_size(patch_size, detail);
        let indices = generate_indices(patch_size, step);

        let indices = if vertex_count(patch_size) - 1 <= u16::MAX as u32 {
            Indices::U16(indices.into_iter().map(|index| index as u16).collect())
        } else {
            Indices::U32(indices)
        };

        Self { step, indices }
    }

    #[inline]
    pub fn step(&self) -> u32 {
        self.step
    }

    #[inline]
    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.len() as u32 / 3
    }

    pub fn index_format(&self) -> IndexFormat {
        match self.indices {
            Indices::U16(_) => IndexFormat::Uint16,
            Indices::U32(_) => IndexFormat::Uint32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.indices {
            Indices::U16(indices) => cast_slice(indices),
            Indices::U32(indices) => cast_slice(indices),
        }
    }
}

/// One [`IndexLevel`] per detail level, built once and shared by all patches.
#[derive(Clone, Debug)]
pub struct IndexLevels {
    patch_size: u32,
    levels: Vec<IndexLevel>,
}

impl IndexLevels {
    pub fn new(patch_size: u32, level_count: u32) -> Self {
        let levels = (0..level_count)
            .map(|detail| IndexLevel::new(patch_size, detail))
            .collect();

        Self { patch_size, levels }
    }

    #[inline]
    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    #[inline]
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// # Panics
    /// If no index buffer exists for the detail level.
    #[inline]
    pub fn level(&self, detail: u32) -> &IndexLevel {
        &self.levels[detail as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexLevel> {
        self.levels.iter()
    }
}
