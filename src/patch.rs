use crate::{
    height_map::HeightMap,
    index_levels::{self, IndexLevels},
    render::{IndexBufferId, TerrainRenderer, TerrainVertex, VertexWindow},
};
use bevy::{
    math::{Affine3A, UVec2, Vec3},
    render::primitives::{Aabb, Frustum},
};
use itertools::iproduct;

/// A square tile of the landscape, the unit of detail selection and culling.
///
/// Patches do not own any height data, they address the shared [`HeightMap`] through
/// their grid offset.
#[derive(Clone, Debug)]
pub struct Patch {
    coordinate: UVec2,
    origin: UVec2,
    size: u32,
    bounds: Aabb,
    detail: u32,
    detail_override: Option<u32>,
    visible: bool,
}

impl Patch {
    pub fn new(coordinate: UVec2, size: u32, height_map: &HeightMap, skirt_depth: f32) -> Self {
        let mut patch = Self {
            coordinate,
            origin: coordinate * size,
            size,
            bounds: Aabb::default(),
            detail: 0,
            detail_override: None,
            visible: true,
        };

        patch.update_bounds(height_map, skirt_depth);
        patch
    }

    /// Position of the patch inside the patch grid.
    #[inline]
    pub fn coordinate(&self) -> UVec2 {
        self.coordinate
    }

    /// Grid offset of the first sample of the patch.
    #[inline]
    pub fn origin(&self) -> UVec2 {
        self.origin
    }

    /// The local space bounding box, including the skirt.
    #[inline]
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// The detail level the patch was last selected with.
    #[inline]
    pub fn detail(&self) -> u32 {
        self.detail
    }

    #[inline]
    pub fn detail_override(&self) -> Option<u32> {
        self.detail_override
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn select_detail(&mut self, detail: u32) {
        self.detail = self.detail_override.unwrap_or(detail);
    }

    pub(crate) fn set_detail_override(&mut self, detail: Option<u32>) {
        self.detail_override = detail;
    }

    pub(crate) fn update_bounds(&mut self, height_map: &HeightMap, skirt_depth: f32) {
        let (min_height, max_height) = height_map.range(self.origin, self.size);
        let min = Vec3::new(self.origin.x as f32, min_height - skirt_depth, self.origin.y as f32);
        let max = Vec3::new(
            (self.origin.x + self.size) as f32,
            max_height,
            (self.origin.y + self.size) as f32,
        );

        self.bounds = Aabb::from_min_max(min, max);
    }

    /// Culls the patch against the frustum, a missing frustum keeps it visible.
    pub fn update_visibility(&mut self, frustum: Option<&Frustum>, world_from_local: &Affine3A) {
        self.visible = frustum
            .map_or(true, |frustum| frustum.intersects_obb(&self.bounds, world_from_local, true, true));
    }

    /// The range of the landscape vertex buffer holding this patch's vertices.
    pub fn vertex_window(&self, patches_per_side: u32) -> VertexWindow {
        let vertex_count = index_levels::vertex_count(self.size);
        let index = self.coordinate.x + self.coordinate.y * patches_per_side;

        VertexWindow {
            base_vertex: index * vertex_count,
            vertex_count,
        }
    }

    /// Builds the surface grid followed by the skirt ring, in the layout shared by all
    /// [`IndexLevels`].
    pub fn vertices(&self, height_map: &HeightMap, skirt_depth: f32) -> Vec<TerrainVertex> {
        let last = height_map.size() - 1;
        let map_size = height_map.size() as f32;

        let vertex = |local: UVec2, depth: f32| {
            let grid = self.origin + local;
            let height = height_map.at((grid.y as usize).min(last), (grid.x as usize).min(last));

            TerrainVertex {
                position: [grid.x as f32, height - depth, grid.y as f32],
                uv: [grid.x as f32 / map_size, grid.y as f32 / map_size],
            }
        };

        let surface = iproduct!(0..=self.size, 0..=self.size)
            .map(|(z, x)| vertex(UVec2::new(x, z), 0.0));
        let skirt = (0..index_levels::skirt_vertex_count(self.size))
            .map(|index| vertex(index_levels::skirt_anchor(self.size, index), skirt_depth));

        surface.chain(skirt).collect()
    }

    /// Draws the patch with the index buffer of the detail level and returns the number
    /// of triangles drawn.
    pub fn render<R: TerrainRenderer>(
        &self,
        detail: u32,
        levels: &IndexLevels,
        index_buffers: &[IndexBufferId],
        window: VertexWindow,
        renderer: &mut R,
    ) -> u32 {
        let level = levels.level(detail);

        renderer.draw_indexed(index_buffers[detail as usize], window, level.len() as u32);
        level.triangle_count()
    }
}
