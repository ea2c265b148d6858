//! Acquisition, smoothing and sampling of the terrain heights.
//!
//! A [`HeightMap`] stores two square grids of equal size: the heights used for
//! geometry and height queries, and a displacement overlay which starts out as a copy
//! of the heights and is then deformed independently (e.g. by craters).
//! Both grids are indexed `[[z, x]]`, so rows run along the z axis.

use crate::error::{TerrainError, TerrainResult};
use bevy::{
    log::{info, warn},
    math::{FloatExt, UVec2},
};
use image::{imageops::FilterType, DynamicImage};
use itertools::iproduct;
use ndarray::{s, Array2};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Where the heights of a landscape come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeightSource {
    /// `map_size²` unsigned bytes in row major order, without any header.
    Raw(PathBuf),
    /// Any image format supported by the `image` crate, the red channel is the height.
    Image(PathBuf),
}

impl HeightSource {
    /// Selects the decoder by extension, only `.raw` files are read as raw grids.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let raw = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("raw"));

        if raw {
            Self::Raw(path.to_path_buf())
        } else {
            Self::Image(path.to_path_buf())
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Raw(path) | Self::Image(path) => path,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeightMap {
    size: usize,
    heights: Array2<f32>,
    displacement: Array2<f32>,
}

impl HeightMap {
    /// Creates a map where every sample has the same height.
    ///
    /// # Panics
    /// If `size` is smaller than 2.
    pub fn flat(size: usize, height: f32) -> Self {
        assert!(size >= 2, "a heightmap needs at least 2x2 samples, got {size}x{size}");

        Self::from_array(Array2::from_elem((size, size), height))
    }

    /// Creates a map from `size²` heights in row major order.
    pub fn from_heights(size: usize, heights: Vec<f32>) -> TerrainResult<Self> {
        check_size(size)?;

        let heights = Array2::from_shape_vec((size, size), heights).map_err(|_| {
            TerrainError::Format(format!("expected {} heights", size * size))
        })?;

        Ok(Self::from_array(heights))
    }

    /// Expects a square array of at least 2x2 samples.
    fn from_array(heights: Array2<f32>) -> Self {
        Self {
            size: heights.nrows(),
            displacement: heights.clone(),
            heights,
        }
    }

    pub fn load(source: &HeightSource, size: usize, vertical_scale: f32) -> TerrainResult<Self> {
        let height_map = match source {
            HeightSource::Raw(path) => Self::from_raw_bytes(&fs::read(path)?, size, vertical_scale)?,
            HeightSource::Image(path) => {
                Self::from_image(&image::open(path)?, size, vertical_scale)?
            }
        };

        info!(
            "loaded {size}x{size} heightmap from {}",
            source.path().display()
        );

        Ok(height_map)
    }

    /// Decodes a raw byte grid.
    ///
    /// The grid is mirrored along both axes, which matches the authoring convention of
    /// the raw files. The outermost ring of samples is forced to zero.
    pub fn from_raw_bytes(bytes: &[u8], size: usize, vertical_scale: f32) -> TerrainResult<Self> {
        check_size(size)?;

        if bytes.len() < size * size {
            return Err(TerrainError::Format(format!(
                "raw heightmap holds {} bytes, but {size}x{size} are required",
                bytes.len()
            )));
        }

        let last = size - 1;
        let mut heights = Array2::zeros((size, size));

        for (row, column) in iproduct!(0..size, 0..size) {
            let border = row == 0 || column == 0 || row == last || column == last;
            let height = if border {
                0.0
            } else {
                bytes[row * size + column] as f32
            };

            heights[[last - row, last - column]] = height * vertical_scale;
        }

        Ok(Self::from_array(heights))
    }

    /// Reads the red channel of an image, resampling it bilinearly if its resolution
    /// differs from `size`.
    pub fn from_image(image: &DynamicImage, size: usize, vertical_scale: f32) -> TerrainResult<Self> {
        check_size(size)?;

        let mut image = image.to_rgba8();

        if image.width() as usize != size || image.height() as usize != size {
            warn!(
                "resampling {}x{} heightmap image to {size}x{size}",
                image.width(),
                image.height()
            );
            image = image::imageops::resize(&image, size as u32, size as u32, FilterType::Triangle);
        }

        let heights = Array2::from_shape_fn((size, size), |(row, column)| {
            image.get_pixel(column as u32, row as u32).0[0] as f32 * vertical_scale
        });

        Ok(Self::from_array(heights))
    }

    /// Number of samples per side.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn heights(&self) -> &Array2<f32> {
        &self.heights
    }

    #[inline]
    pub fn displacement(&self) -> &Array2<f32> {
        &self.displacement
    }

    /// The height at the sample in `row` (z) and `column` (x).
    ///
    /// # Panics
    /// If the sample lies outside of the map.
    #[inline]
    pub fn at(&self, row: usize, column: usize) -> f32 {
        assert!(
            row < self.size && column < self.size,
            "sample ({column}, {row}) is outside of the {0}x{0} heightmap",
            self.size
        );

        self.heights[[row, column]]
    }

    #[inline]
    pub fn displacement_at(&self, row: usize, column: usize) -> f32 {
        assert!(
            row < self.size && column < self.size,
            "sample ({column}, {row}) is outside of the {0}x{0} displacement map",
            self.size
        );

        self.displacement[[row, column]]
    }

    #[inline]
    pub fn get(&self, x: usize, z: usize) -> Option<f32> {
        self.heights.get([z, x]).copied()
    }

    /// The height of the sample containing the grid position, zero outside of the map.
    pub fn cell_height(&self, x: f32, z: f32) -> f32 {
        if x < 0.0 || z < 0.0 {
            return 0.0;
        }

        self.get(x as usize, z as usize).unwrap_or(0.0)
    }

    pub fn min_height(&self) -> f32 {
        self.heights.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_height(&self) -> f32 {
        self.heights.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// The height range of the `(size + 1)²` samples starting at `origin`, clipped to
    /// the map.
    pub fn range(&self, origin: UVec2, size: u32) -> (f32, f32) {
        let x0 = (origin.x as usize).min(self.size - 1);
        let z0 = (origin.y as usize).min(self.size - 1);
        let x1 = (origin.x as usize + size as usize + 1).min(self.size);
        let z1 = (origin.y as usize + size as usize + 1).min(self.size);

        self.heights
            .slice(s![z0..z1, x0..x1])
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &height| {
                (min.min(height), max.max(height))
            })
    }

    /// Blends every sample with the average of its neighbours, `passes` times.
    ///
    /// Each pass reads only the result of the previous pass. Samples on the border
    /// average over the neighbours that exist.
    pub fn smooth(&mut self, passes: u32) {
        for _ in 0..passes {
            let previous = self.heights.clone();

            for ((z, x), height) in self.heights.indexed_iter_mut() {
                let mut total = 0.0;
                let mut count = 0;

                for (dz, dx) in iproduct!(-1..=1, -1..=1) {
                    if dz == 0 && dx == 0 {
                        continue;
                    }

                    let (Some(nz), Some(nx)) =
                        (z.checked_add_signed(dz), x.checked_add_signed(dx))
                    else {
                        continue;
                    };

                    if let Some(&neighbour) = previous.get([nz, nx]) {
                        total += neighbour;
                        count += 1;
                    }
                }

                *height = 0.5 * (previous[[z, x]] + total / count as f32);
            }
        }
    }

    /// Bilinearly interpolates the heights at a fractional grid position.
    ///
    /// Positions outside of the map are clamped onto its border.
    pub fn sample(&self, x: f32, z: f32) -> f32 {
        let max = (self.size - 1) as f32;
        let x = x.clamp(0.0, max);
        let z = z.clamp(0.0, max);

        let left = (x as usize).min(self.size - 2);
        let top = (z as usize).min(self.size - 2);
        let fx = x - left as f32;
        let fz = z - top as f32;

        let h = &self.heights;
        let top_height = h[[top, left]].lerp(h[[top, left + 1]], fx);
        let bottom_height = h[[top + 1, left]].lerp(h[[top + 1, left + 1]], fx);

        top_height.lerp(bottom_height, fz)
    }

    /// Subtracts `delta` from the displacement of every sample inside the
    /// `footprint × footprint` square centered on the sample `(x, z)`.
    ///
    /// Returns the number of samples changed.
    pub fn displace(&mut self, x: i64, z: i64, footprint: u32, delta: f32) -> usize {
        let half = footprint as i64 / 2;
        let clip = |start: i64| {
            let end = (start + footprint as i64).clamp(0, self.size as i64) as usize;
            (start.clamp(0, self.size as i64) as usize)..end
        };

        let rows = clip(z - half);
        let columns = clip(x - half);

        let mut region = self.displacement.slice_mut(s![rows, columns]);
        region.map_inplace(|value| *value -= delta);
        region.len()
    }
}

fn check_size(size: usize) -> TerrainResult<()> {
    if size < 2 {
        return Err(TerrainError::Configuration(format!(
            "a heightmap needs at least 2x2 samples, got {size}x{size}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_map(size: usize, seed: u64) -> HeightMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let heights = (0..size * size)
            .map(|_| rng.random_range(0.0..255.0))
            .collect();

        HeightMap::from_heights(size, heights).unwrap()
    }

    #[test]
    fn source_from_extension() {
        assert!(matches!(
            HeightSource::from_path("terrain/height.RAW"),
            HeightSource::Raw(_)
        ));
        assert!(matches!(
            HeightSource::from_path("terrain/height.png"),
            HeightSource::Image(_)
        ));
        assert!(matches!(
            HeightSource::from_path("terrain/height"),
            HeightSource::Image(_)
        ));
    }

    #[test]
    fn raw_border_is_zero() {
        for size in 2..12 {
            let bytes = vec![200; size * size];
            let map = HeightMap::from_raw_bytes(&bytes, size, 0.5).unwrap();

            for i in 0..size {
                assert_eq!(map.at(0, i), 0.0);
                assert_eq!(map.at(size - 1, i), 0.0);
                assert_eq!(map.at(i, 0), 0.0);
                assert_eq!(map.at(i, size - 1), 0.0);
            }

            if size > 2 {
                assert_eq!(map.at(1, 1), 100.0);
            }
        }
    }

    #[test]
    fn raw_is_mirrored() {
        let size = 4;
        let bytes: Vec<u8> = (0..16).collect();
        let map = HeightMap::from_raw_bytes(&bytes, size, 1.0).unwrap();

        // byte (row 1, column 2) lands on (row 2, column 1)
        assert_eq!(map.at(2, 1), 6.0);
        assert_eq!(map.at(1, 2), 9.0);
        assert_eq!(map.displacement(), map.heights());
    }

    #[test]
    fn short_raw_is_a_format_error() {
        let error = HeightMap::from_raw_bytes(&[0; 15], 4, 1.0).unwrap_err();
        assert!(error.is_format_error());
    }

    #[test]
    fn image_reads_red_channel() {
        let image = RgbaImage::from_fn(4, 4, |x, y| Rgba([(x + 4 * y) as u8, 99, 99, 255]));
        let map = HeightMap::from_image(&DynamicImage::ImageRgba8(image), 4, 2.0).unwrap();

        assert_eq!(map.at(0, 3), 6.0);
        assert_eq!(map.at(3, 0), 24.0);
    }

    #[test]
    fn small_image_is_resampled() {
        let image = GrayImage::from_pixel(2, 2, Luma([40]));
        let map = HeightMap::from_image(&DynamicImage::ImageLuma8(image), 8, 1.0).unwrap();

        assert_eq!(map.size(), 8);
        assert!(map.heights().iter().all(|&height| height == 40.0));
    }

    #[test]
    fn degenerate_sizes_are_rejected() {
        for size in [0, 1] {
            let samples = size * size;

            let error = HeightMap::from_heights(size, vec![1.0; samples]).unwrap_err();
            assert!(error.is_configuration_error(), "{size}");

            let error = HeightMap::from_raw_bytes(&vec![7u8; samples], size, 1.0).unwrap_err();
            assert!(error.is_configuration_error(), "{size}");

            let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([9])));
            let error = HeightMap::from_image(&image, size, 1.0).unwrap_err();
            assert!(error.is_configuration_error(), "{size}");
        }
    }

    #[test]
    #[should_panic(expected = "at least 2x2 samples")]
    fn flat_needs_two_samples() {
        HeightMap::flat(1, 5.0);
    }

    #[test]
    fn smallest_map_samples_and_smooths() {
        let mut map = HeightMap::from_heights(2, vec![0.0, 4.0, 8.0, 12.0]).unwrap();

        assert_eq!(map.sample(0.5, 0.5), 6.0);
        assert_eq!(map.sample(-3.0, 9.0), 8.0);

        map.smooth(1);
        assert!(map.heights().iter().all(|height| height.is_finite()));
        assert_eq!(map.at(0, 0), 0.5 * (0.0 + 24.0 / 3.0));
    }

    #[test]
    fn height_extremes() {
        let map = HeightMap::from_heights(2, vec![3.0, -1.5, 8.0, 2.0]).unwrap();

        assert_eq!(map.min_height(), -1.5);
        assert_eq!(map.max_height(), 8.0);
    }

    #[test]
    fn loads_image_file() {
        let path = std::env::temp_dir().join("bevy_geomipmap_loads_image_file.png");
        GrayImage::from_fn(4, 4, |x, y| Luma([(x + 4 * y) as u8]))
            .save(&path)
            .unwrap();

        let map = HeightMap::load(&HeightSource::from_path(&path), 4, 2.0).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(map.at(0, 0), 0.0);
        assert_eq!(map.at(0, 3), 6.0);
        assert_eq!(map.at(3, 1), 26.0);
        assert_eq!(map.displacement(), map.heights());
    }

    #[test]
    fn undecodable_image_is_a_format_error() {
        let path = std::env::temp_dir().join("bevy_geomipmap_undecodable_image.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let error = HeightMap::load(&HeightSource::from_path(&path), 4, 1.0).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(error, TerrainError::Image(_)));
        assert!(error.is_format_error());
    }

    #[test]
    fn smooth_zero_is_noop() {
        let map = random_map(16, 3);
        let mut smoothed = map.clone();
        smoothed.smooth(0);

        assert_eq!(map, smoothed);
    }

    #[test]
    fn smooth_flat_is_noop() {
        for height in [0.0, 2.5] {
            let mut map = HeightMap::flat(16, height);
            map.smooth(5);

            assert!(map.heights().iter().all(|&h| h == height));
        }
    }

    #[test]
    fn smooth_averages_existing_neighbours() {
        let mut heights = vec![0.0; 9];
        heights[0] = 9.0;
        let mut map = HeightMap::from_heights(3, heights).unwrap();
        map.smooth(1);

        // corner with three neighbours, all zero
        assert_eq!(map.at(0, 0), 4.5);
        // edge sample with five neighbours, one of them the peak
        assert_eq!(map.at(0, 1), 0.5 * 9.0 / 5.0);
        // center sample with eight neighbours
        assert_eq!(map.at(1, 1), 0.5 * 9.0 / 8.0);
    }

    #[test]
    fn smooth_is_order_independent() {
        let mut map = random_map(8, 11);
        let mut transposed = HeightMap::from_array(map.heights().t().to_owned());

        map.smooth(2);
        transposed.smooth(2);

        for (z, x) in iproduct!(0..8, 0..8) {
            assert!((map.at(z, x) - transposed.at(x, z)).abs() < 1e-2);
        }
    }

    #[test]
    fn sample_hits_grid_points() {
        let map = random_map(8, 5);

        for (z, x) in iproduct!(0..8, 0..8) {
            assert!((map.sample(x as f32, z as f32) - map.at(z, x)).abs() < 1e-4);
        }
    }

    #[test]
    fn sample_is_bounded_by_cell_corners() {
        let map = random_map(16, 7);
        let mut rng = StdRng::seed_from_u64(13);

        for _ in 0..500 {
            let (x, z) = (rng.random_range(0..15usize), rng.random_range(0..15usize));
            let corners = [
                map.at(z, x),
                map.at(z, x + 1),
                map.at(z + 1, x),
                map.at(z + 1, x + 1),
            ];
            let min = corners.iter().copied().fold(f32::INFINITY, f32::min);
            let max = corners.iter().copied().fold(f32::NEG_INFINITY, f32::max);

            let a = map.sample(x as f32 + rng.random::<f32>(), z as f32 + rng.random::<f32>());
            let b = map.sample(x as f32 + rng.random::<f32>(), z as f32 + rng.random::<f32>());

            assert!((a - b).abs() <= max - min + 1e-3);
        }
    }

    #[test]
    fn sample_clamps_outside() {
        let map = random_map(8, 17);

        assert_eq!(map.sample(-5.0, -5.0), map.at(0, 0));
        assert!((map.sample(100.0, 100.0) - map.at(7, 7)).abs() < 1e-4);
        assert!((map.sample(7.0, 3.0) - map.at(3, 7)).abs() < 1e-4);
    }

    #[test]
    fn cell_height_outside_is_zero() {
        let map = HeightMap::flat(4, 3.0);

        assert_eq!(map.cell_height(1.5, 2.5), 3.0);
        assert_eq!(map.cell_height(-1.0, 2.0), 0.0);
        assert_eq!(map.cell_height(4.0, 0.0), 0.0);
    }

    #[test]
    fn displace_footprint() {
        let mut map = HeightMap::flat(64, 10.0);
        let changed = map.displace(32, 32, 20, 1.0);

        assert_eq!(changed, 400);
        assert_eq!(map.displacement_at(32, 32), 9.0);
        assert_eq!(map.displacement_at(22, 22), 9.0);
        assert_eq!(map.displacement_at(41, 41), 9.0);
        assert_eq!(map.displacement_at(21, 32), 10.0);
        assert_eq!(map.displacement_at(32, 42), 10.0);
        // the heights are untouched
        assert!(map.heights().iter().all(|&h| h == 10.0));
    }

    #[test]
    fn displace_is_clipped() {
        let mut map = HeightMap::flat(64, 0.0);

        assert_eq!(map.displace(0, 0, 20, 1.0), 100);
        assert_eq!(map.displacement_at(0, 0), -1.0);
        assert_eq!(map.displacement_at(10, 0), 0.0);
        assert_eq!(map.displace(-100, 0, 20, 1.0), 0);
    }

    #[test]
    fn range_of_patch() {
        let heights = (0..64).map(|i| i as f32).collect();
        let map = HeightMap::from_heights(8, heights).unwrap();

        assert_eq!(map.range(UVec2::new(0, 0), 4), (0.0, 36.0));
        assert_eq!(map.range(UVec2::new(4, 4), 4), (36.0, 63.0));
    }
}
