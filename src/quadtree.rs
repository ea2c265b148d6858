//! The static quadtree over the patch grid of a landscape.
//!
//! The tree is built once and never changes. Every frame it is traversed towards the
//! camera, which yields a list of [`PatchBlock`]s: square groups of patches together
//! with the detail level they are drawn with. The blocks cover every patch of the
//! landscape exactly once.
//!
//! Levels count upwards from the leaves, so a leaf (one patch) has level 0 and the
//! root has level `log2(patches per side)`. A block selected at a node of level `l`
//! is drawn with detail `l`.

use bevy::math::{UVec2, Vec2};
use itertools::iproduct;
use serde::{Deserialize, Serialize};

/// Decides when a quadtree node is split into its children.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum SelectionPolicy {
    /// Always descends to the leaves, so every patch uses the finest detail.
    Full,
    /// Descends into a node while the camera is closer to it than
    /// `lod_factor` times its width, coarser nodes are drawn as one block.
    Distance { lod_factor: f32 },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::Distance { lod_factor: 2.0 }
    }
}

/// A square group of patches drawn with the same detail level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchBlock {
    /// The first patch (inclusive).
    pub start: UVec2,
    /// The last patch (exclusive).
    pub end: UVec2,
    pub detail: u32,
}

impl PatchBlock {
    /// The grid coordinates of all patches inside the block, row by row.
    pub fn patches(&self) -> impl Iterator<Item = UVec2> {
        iproduct!(self.start.y..self.end.y, self.start.x..self.end.x)
            .map(|(j, i)| UVec2::new(i, j))
    }

    #[inline]
    pub fn patch_count(&self) -> u32 {
        (self.end.x - self.start.x) * (self.end.y - self.start.y)
    }
}

#[derive(Clone, Debug)]
pub struct QuadtreeNode {
    pub x: f32,
    pub z: f32,
    pub width: f32,
    pub level: u32,
    /// Lower left, lower right, upper left, upper right.
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl QuadtreeNode {
    fn build(x: f32, z: f32, width: f32, leaf_width: f32) -> Self {
        if width <= leaf_width {
            return Self {
                x,
                z,
                width,
                level: 0,
                children: None,
            };
        }

        let half = width / 2.0;
        let children = Box::new([
            Self::build(x, z, half, leaf_width),
            Self::build(x + half, z, half, leaf_width),
            Self::build(x, z + half, half, leaf_width),
            Self::build(x + half, z + half, half, leaf_width),
        ]);

        Self {
            x,
            z,
            width,
            level: children[0].level + 1,
            children: Some(children),
        }
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> Option<&[QuadtreeNode; 4]> {
        self.children.as_deref()
    }

    pub fn lower_left(&self) -> Option<&QuadtreeNode> {
        self.children().map(|children| &children[0])
    }

    pub fn lower_right(&self) -> Option<&QuadtreeNode> {
        self.children().map(|children| &children[1])
    }

    pub fn upper_left(&self) -> Option<&QuadtreeNode> {
        self.children().map(|children| &children[2])
    }

    pub fn upper_right(&self) -> Option<&QuadtreeNode> {
        self.children().map(|children| &children[3])
    }

    /// Distance from the point to the square of the node, zero inside.
    pub fn distance(&self, point: Vec2) -> f32 {
        let min = Vec2::new(self.x, self.z);
        let max = min + self.width;

        point.clamp(min, max).distance(point)
    }
}

#[derive(Clone, Debug)]
pub struct Quadtree {
    root: QuadtreeNode,
    origin: Vec2,
    leaf_width: f32,
    patches_per_side: u32,
}

impl Quadtree {
    /// Partitions the square of `width` starting at `origin` down to leaves of
    /// `leaf_width`, which is the footprint of a single patch.
    ///
    /// If the number of patches per side is not a power of two, the tree covers the
    /// next larger power of two and the surplus nodes are never selected.
    pub fn new(origin: Vec2, width: f32, leaf_width: f32) -> Self {
        let patches_per_side = ((width / leaf_width).round() as u32).max(1);
        let root_width = leaf_width * patches_per_side.next_power_of_two() as f32;

        Self {
            root: QuadtreeNode::build(origin.x, origin.y, root_width, leaf_width),
            origin,
            leaf_width,
            patches_per_side,
        }
    }

    #[inline]
    pub fn root(&self) -> &QuadtreeNode {
        &self.root
    }

    #[inline]
    pub fn patches_per_side(&self) -> u32 {
        self.patches_per_side
    }

    /// Selects the patch blocks to draw for a camera at `camera` (in the same plane and
    /// units as the tree).
    pub fn select(&self, camera: Vec2, policy: SelectionPolicy) -> Vec<PatchBlock> {
        let mut selection = Vec::new();
        self.select_node(&self.root, camera, policy, &mut selection);
        selection
    }

    fn select_node(
        &self,
        node: &QuadtreeNode,
        camera: Vec2,
        policy: SelectionPolicy,
        selection: &mut Vec<PatchBlock>,
    ) {
        let start = ((Vec2::new(node.x, node.z) - self.origin) / self.leaf_width)
            .round()
            .as_uvec2();

        // node lies in the padding beyond the landscape
        if start.x >= self.patches_per_side || start.y >= self.patches_per_side {
            return;
        }

        let subdivide = match policy {
            SelectionPolicy::Full => true,
            SelectionPolicy::Distance { lod_factor } => {
                node.distance(camera) < node.width * lod_factor
            }
        };

        match node.children() {
            Some(children) if subdivide && node.level > 0 => {
                for child in children.iter() {
                    self.select_node(child, camera, policy, selection);
                }
            }
            _ => {
                let size = (node.width / self.leaf_width).round() as u32;

                selection.push(PatchBlock {
                    start,
                    end: (start + size).min(UVec2::splat(self.patches_per_side)),
                    detail: node.level,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn assert_covered_once(blocks: &[PatchBlock], patches_per_side: u32) {
        let side = patches_per_side as usize;
        let mut coverage = Array2::<u32>::zeros((side, side));

        for block in blocks {
            for patch in block.patches() {
                coverage[[patch.y as usize, patch.x as usize]] += 1;
            }
        }

        assert!(
            coverage.iter().all(|&count| count == 1),
            "{coverage:?} {blocks:?}"
        );
    }

    fn check_node(node: &QuadtreeNode, leaf_width: f32) {
        match node.children() {
            Some(children) => {
                for child in children {
                    assert_eq!(child.width, node.width / 2.0);
                    assert_eq!(child.level + 1, node.level);
                    check_node(child, leaf_width);
                }
            }
            None => {
                assert_eq!(node.width, leaf_width);
                assert_eq!(node.level, 0);
            }
        }
    }

    #[test]
    fn structure() {
        let quadtree = Quadtree::new(Vec2::ZERO, 64.0 * 2.0, 16.0 * 2.0);
        let root = quadtree.root();

        assert_eq!(quadtree.patches_per_side(), 4);
        assert_eq!(root.level, 2);
        check_node(root, 32.0);

        let upper_right = root.upper_right().unwrap();
        assert_eq!((upper_right.x, upper_right.z), (64.0, 64.0));
        let lower_right = root.lower_right().unwrap();
        assert_eq!((lower_right.x, lower_right.z), (64.0, 0.0));
        assert!(upper_right.upper_left().unwrap().lower_left().is_none());
    }

    #[test]
    fn single_patch() {
        let quadtree = Quadtree::new(Vec2::ZERO, 16.0, 16.0);

        assert!(!quadtree.root().has_children());
        assert_eq!(
            quadtree.select(Vec2::ZERO, SelectionPolicy::Full),
            vec![PatchBlock {
                start: UVec2::ZERO,
                end: UVec2::ONE,
                detail: 0
            }]
        );
    }

    #[test]
    fn full_selects_leaves() {
        let quadtree = Quadtree::new(Vec2::ZERO, 64.0, 16.0);
        let blocks = quadtree.select(Vec2::new(1000.0, 1000.0), SelectionPolicy::Full);

        assert_eq!(blocks.len(), 16);
        assert!(blocks.iter().all(|block| block.detail == 0));
        assert!(blocks.iter().all(|block| block.patch_count() == 1));
        assert_covered_once(&blocks, 4);
    }

    #[test]
    fn distant_camera_selects_root() {
        let quadtree = Quadtree::new(Vec2::ZERO, 64.0, 16.0);
        let blocks = quadtree.select(
            Vec2::new(10_000.0, 0.0),
            SelectionPolicy::Distance { lod_factor: 2.0 },
        );

        assert_eq!(
            blocks,
            vec![PatchBlock {
                start: UVec2::ZERO,
                end: UVec2::splat(4),
                detail: 2
            }]
        );
    }

    #[test]
    fn detail_decreases_with_distance() {
        let quadtree = Quadtree::new(Vec2::ZERO, 256.0, 16.0);
        let blocks = quadtree.select(Vec2::ZERO, SelectionPolicy::Distance { lod_factor: 0.5 });
        let detail_of = |patch: UVec2| {
            blocks
                .iter()
                .find(|block| block.patches().any(|p| p == patch))
                .unwrap()
                .detail
        };

        assert_eq!(detail_of(UVec2::ZERO), 0);
        assert!(detail_of(UVec2::splat(15)) > detail_of(UVec2::splat(4)));
        assert!(detail_of(UVec2::splat(4)) > 0);
        assert_covered_once(&blocks, 16);
    }

    #[test]
    fn offset_origin() {
        let quadtree = Quadtree::new(Vec2::new(-100.0, 50.0), 32.0, 8.0);
        let blocks = quadtree.select(
            Vec2::new(-100.0, 50.0),
            SelectionPolicy::Distance { lod_factor: 0.1 },
        );

        assert!(blocks.contains(&PatchBlock {
            start: UVec2::ZERO,
            end: UVec2::ONE,
            detail: 0
        }));
        assert_covered_once(&blocks, 4);
    }

    #[test]
    fn covers_every_patch_exactly_once() {
        let mut rng = StdRng::seed_from_u64(42);

        for patches_per_side in 1..=9 {
            let leaf_width = 12.0;
            let width = leaf_width * patches_per_side as f32;
            let quadtree = Quadtree::new(Vec2::ZERO, width, leaf_width);

            for _ in 0..50 {
                let camera = Vec2::new(
                    rng.random_range(-width..2.0 * width),
                    rng.random_range(-width..2.0 * width),
                );

                for policy in [
                    SelectionPolicy::Full,
                    SelectionPolicy::Distance {
                        lod_factor: rng.random_range(0.0..4.0),
                    },
                ] {
                    assert_covered_once(&quadtree.select(camera, policy), patches_per_side);
                }
            }
        }
    }
}
