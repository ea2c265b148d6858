use crate::{
    config::LandscapeConfig,
    error::{TerrainError, TerrainResult},
    height_map::{HeightMap, HeightSource},
    index_levels::IndexLevels,
    patch::Patch,
    quadtree::{PatchBlock, Quadtree},
    render::{
        IndexBufferDescriptor, IndexBufferId, PendingUploads, TerrainRenderable, TerrainRenderer,
        TerrainVertex, DISPLACEMENT_UNIFORM,
    },
    viewer::TerrainViewer,
};
use bevy::{
    log::{debug, info},
    math::Affine3A,
    prelude::*,
};
use ndarray::Array2;

/// A geomipmapped heightfield terrain.
///
/// The landscape owns the heightmap, the patch grid, the quadtree over the patches and
/// the index buffers of all detail levels. Each frame [`Landscape::update`] selects
/// the detail of every patch for the current viewer and [`Landscape::draw`] records
/// the visible patches with a [`TerrainRenderer`].
///
/// In local space one unit along x and z is one heightmap cell, heights are already
/// in world units. The configured transform maps local space into the world.
#[derive(Component)]
pub struct Landscape {
    config: LandscapeConfig,
    world_from_local: Affine3A,
    local_from_world: Affine3A,
    height_map: HeightMap,
    /// Indexed `[[j, i]]`.
    patches: Array2<Patch>,
    quadtree: Quadtree,
    index_levels: IndexLevels,
    index_buffers: Vec<IndexBufferId>,
    pending: PendingUploads,
    selection: Vec<PatchBlock>,
    patches_rendered: u32,
    triangles_rendered: u32,
}

impl Landscape {
    /// Loads the configured height source and builds the landscape.
    pub fn new(config: LandscapeConfig) -> TerrainResult<Self> {
        config.validate()?;

        let source = HeightSource::from_path(&config.height_source);
        let height_map = HeightMap::load(&source, config.map_size as usize, config.scale[1])?;

        Self::from_height_map(config, height_map)
    }

    /// Builds the landscape on top of already decoded heights.
    pub fn from_height_map(config: LandscapeConfig, mut height_map: HeightMap) -> TerrainResult<Self> {
        config.validate()?;

        if height_map.size() != config.map_size as usize {
            return Err(TerrainError::Configuration(format!(
                "heightmap has {0}x{0} samples, but the map size is {1}",
                height_map.size(),
                config.map_size
            )));
        }

        height_map.smooth(config.smoothing_passes);

        let patches_per_side = config.patches_per_side() as usize;
        let patches = Array2::from_shape_fn((patches_per_side, patches_per_side), |(j, i)| {
            Patch::new(
                UVec2::new(i as u32, j as u32),
                config.patch_size,
                &height_map,
                config.skirt_depth,
            )
        });

        let scale = config.scale();
        let quadtree = Quadtree::new(
            Vec2::ZERO,
            config.map_size as f32 * scale.x,
            config.patch_size as f32 * scale.x,
        );

        let index_levels = IndexLevels::new(config.patch_size, config.level_count());

        info!(
            "built {patches_per_side}x{patches_per_side} patches with {} detail levels, heights {}..{}",
            index_levels.level_count(),
            height_map.min_height(),
            height_map.max_height()
        );

        let transform = config.transform();
        let world_from_local = Affine3A::from_scale_rotation_translation(
            Vec3::new(scale.x, 1.0, scale.z),
            transform.rotation,
            transform.translation,
        );

        Ok(Self {
            config,
            world_from_local,
            local_from_world: world_from_local.inverse(),
            height_map,
            patches,
            quadtree,
            index_levels,
            index_buffers: Vec::new(),
            pending: PendingUploads::all(),
            selection: Vec::new(),
            patches_rendered: 0,
            triangles_rendered: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &LandscapeConfig {
        &self.config
    }

    #[inline]
    pub fn height_map(&self) -> &HeightMap {
        &self.height_map
    }

    #[inline]
    pub fn quadtree(&self) -> &Quadtree {
        &self.quadtree
    }

    #[inline]
    pub fn index_levels(&self) -> &IndexLevels {
        &self.index_levels
    }

    #[inline]
    pub fn world_from_local(&self) -> &Affine3A {
        &self.world_from_local
    }

    #[inline]
    pub fn patches_per_side(&self) -> u32 {
        self.config.patches_per_side()
    }

    pub fn patch(&self, i: u32, j: u32) -> Option<&Patch> {
        self.patches.get([j as usize, i as usize])
    }

    pub fn patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    /// The patch blocks chosen by the last [`Landscape::update`].
    #[inline]
    pub fn selection(&self) -> &[PatchBlock] {
        &self.selection
    }

    #[inline]
    pub fn pending_uploads(&self) -> PendingUploads {
        self.pending
    }

    /// Number of patches drawn by the last [`Landscape::draw`].
    #[inline]
    pub fn patches_rendered(&self) -> u32 {
        self.patches_rendered
    }

    /// Number of triangles drawn by the last [`Landscape::draw`].
    #[inline]
    pub fn triangles_rendered(&self) -> u32 {
        self.triangles_rendered
    }

    /// Selects the detail level and visibility of every patch for the viewer.
    pub fn update(&mut self, viewer: &impl TerrainViewer) {
        let eye = self.local_from_world.transform_point3(viewer.eye_position());
        let camera = Vec2::new(eye.x, eye.z) * self.config.scale[0];
        let frustum = viewer.frustum().filter(|_| self.config.clip);
        let max_detail = self.index_levels.level_count() - 1;

        self.selection = self.quadtree.select(camera, self.config.selection);

        for block in &self.selection {
            for coordinate in block.patches() {
                let patch = &mut self.patches[[coordinate.y as usize, coordinate.x as usize]];

                patch.select_detail(block.detail.min(max_detail));
                patch.update_visibility(frustum, &self.world_from_local);
            }
        }

        debug!(
            "selected {} patch blocks for viewer at {}",
            self.selection.len(),
            viewer.eye_position()
        );
    }

    /// Uploads stale GPU data, binds the terrain effect and draws all visible patches.
    pub fn draw<R: TerrainRenderer>(&mut self, renderer: &mut R) {
        self.flush_uploads(renderer);
        renderer.bind_effect();
        self.draw_indexed(renderer);
    }

    fn flush_uploads<R: TerrainRenderer>(&mut self, renderer: &mut R) {
        if self.pending.contains(PendingUploads::INDEX_BUFFERS) {
            self.index_buffers = self
                .index_levels
                .iter()
                .enumerate()
                .map(|(detail, level)| {
                    renderer.create_index_buffer(&IndexBufferDescriptor {
                        label: &format!("landscape_index_buffer_{detail}"),
                        contents: level.as_bytes(),
                        format: level.index_format(),
                        index_count: level.len() as u32,
                    })
                })
                .collect();

            info!("uploaded {} index buffers", self.index_buffers.len());
        }

        if self.pending.contains(PendingUploads::VERTICES) {
            renderer.upload_vertices(&self.vertices());
        }

        if self.pending.contains(PendingUploads::DISPLACEMENT) {
            let displacement = self.height_map.displacement().as_standard_layout();
            renderer.set_uniform(DISPLACEMENT_UNIFORM, displacement.as_slice().unwrap_or_default());
        }

        self.pending = PendingUploads::empty();
    }

    /// The vertices of all patches, each patch occupying its
    /// [`Patch::vertex_window`].
    pub fn vertices(&self) -> Vec<TerrainVertex> {
        self.patches
            .iter()
            .flat_map(|patch| patch.vertices(&self.height_map, self.config.skirt_depth))
            .collect()
    }

    /// The interpolated world space height below the position.
    ///
    /// Positions outside of the landscape are clamped onto its border.
    pub fn height(&self, position: Vec3) -> f32 {
        let local = self.local_from_world.transform_point3(position);
        let height = self.height_map.sample(local.x, local.z);

        self.world_from_local
            .transform_point3(Vec3::new(local.x, height, local.z))
            .y
    }

    /// Like [`Landscape::height`], but fails for positions outside of the landscape.
    pub fn try_height(&self, position: Vec3) -> TerrainResult<f32> {
        let local = self.local_from_world.transform_point3(position);
        let limit = (self.height_map.size() - 1) as f32;

        for (what, value) in [("x", local.x), ("z", local.z)] {
            if !(0.0..=limit).contains(&value) {
                return Err(TerrainError::OutOfRange { what, value, limit });
            }
        }

        Ok(self.height(position))
    }

    /// Lowers the displacement map in the square footprint around the position.
    pub fn apply_displacement(&mut self, center: Vec3, delta: f32) {
        let local = self.local_from_world.transform_point3(center);
        let changed = self.height_map.displace(
            local.x.floor() as i64,
            local.z.floor() as i64,
            self.config.displacement_footprint,
            delta,
        );

        if changed > 0 {
            self.pending |= PendingUploads::DISPLACEMENT;
        }

        debug!("displaced {changed} samples around {center}");
    }

    /// Smooths the heights again, refreshing the patch bounds and vertices.
    pub fn smooth(&mut self, passes: u32) {
        if passes == 0 {
            return;
        }

        self.height_map.smooth(passes);

        for patch in self.patches.iter_mut() {
            patch.update_bounds(&self.height_map, self.config.skirt_depth);
        }

        self.pending |= PendingUploads::VERTICES;
    }

    /// Pins the patch `(i, j)` to a detail level, regardless of the quadtree selection.
    pub fn set_detail(&mut self, i: u32, j: u32, detail: u32) -> TerrainResult<()> {
        let level_count = self.index_levels.level_count();

        if detail >= level_count {
            return Err(TerrainError::OutOfRange {
                what: "detail level",
                value: detail as f32,
                limit: level_count as f32,
            });
        }

        let patch = self.patch_mut(i, j)?;
        patch.set_detail_override(Some(detail));
        patch.select_detail(detail);

        Ok(())
    }

    /// Returns the patch `(i, j)` to the detail chosen by the quadtree.
    pub fn clear_detail(&mut self, i: u32, j: u32) -> TerrainResult<()> {
        self.patch_mut(i, j)?.set_detail_override(None);
        Ok(())
    }

    fn patch_mut(&mut self, i: u32, j: u32) -> TerrainResult<&mut Patch> {
        let limit = self.patches_per_side() as f32;

        self.patches
            .get_mut([j as usize, i as usize])
            .ok_or(TerrainError::OutOfRange {
                what: "patch",
                value: i.max(j) as f32,
                limit,
            })
    }
}

impl TerrainRenderable for Landscape {
    /// Only uploads while the index buffers are pending, so repeated calls keep the
    /// buffers created first.
    fn init_index_buffers<R: TerrainRenderer>(&mut self, renderer: &mut R) {
        if !self.pending.contains(PendingUploads::INDEX_BUFFERS) {
            return;
        }

        let remaining = self.pending - PendingUploads::INDEX_BUFFERS;

        self.pending = PendingUploads::INDEX_BUFFERS;
        self.flush_uploads(renderer);
        self.pending = remaining;
    }

    fn draw_indexed<R: TerrainRenderer>(&mut self, renderer: &mut R) {
        if !self.pending.is_empty() {
            self.flush_uploads(renderer);
        }

        let patches_per_side = self.patches_per_side();
        let mut patches_rendered = 0;
        let mut triangles_rendered = 0;

        for block in &self.selection {
            for coordinate in block.patches() {
                let patch = &self.patches[[coordinate.y as usize, coordinate.x as usize]];

                if patch.is_visible() {
                    patches_rendered += 1;
                    triangles_rendered += patch.render(
                        patch.detail(),
                        &self.index_levels,
                        &self.index_buffers,
                        patch.vertex_window(patches_per_side),
                        renderer,
                    );
                }
            }
        }

        self.patches_rendered = patches_rendered;
        self.triangles_rendered = triangles_rendered;
    }

    fn sample(&self, position: Vec3) -> f32 {
        self.height(position)
    }
}
