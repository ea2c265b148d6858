use bevy::{prelude::*, render::primitives::Frustum};

/// The camera the landscape selects its detail for.
pub trait TerrainViewer {
    /// World space eye position.
    fn eye_position(&self) -> Vec3;

    /// The view frustum used for patch culling, `None` disables culling for this view.
    fn frustum(&self) -> Option<&Frustum>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Viewer {
    pub position: Vec3,
    pub frustum: Option<Frustum>,
}

impl Viewer {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            frustum: None,
        }
    }

    /// A viewer with the frustum of the camera's `clip_from_world` matrix.
    pub fn from_clip_from_world(position: Vec3, clip_from_world: &Mat4) -> Self {
        Self {
            position,
            frustum: Some(Frustum::from_clip_from_world(clip_from_world)),
        }
    }
}

impl TerrainViewer for Viewer {
    #[inline]
    fn eye_position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    fn frustum(&self) -> Option<&Frustum> {
        self.frustum.as_ref()
    }
}
