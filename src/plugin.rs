use crate::{landscape::Landscape, viewer::Viewer};
use bevy::{
    prelude::*,
    render::primitives::Frustum,
    transform::TransformSystem,
};

/// Marks the camera that drives the detail selection of all landscapes.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct TerrainView;

/// Updates every [`Landscape`] for the [`TerrainView`] camera once per frame.
pub struct GeomipmapPlugin;

impl Plugin for GeomipmapPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            PostUpdate,
            update_landscapes.after(TransformSystem::TransformPropagate),
        );
    }
}

pub fn update_landscapes(
    views: Query<(&GlobalTransform, Option<&Frustum>), With<TerrainView>>,
    mut landscapes: Query<&mut Landscape>,
) {
    let Some((transform, frustum)) = views.iter().next() else {
        return;
    };

    let viewer = Viewer {
        position: transform.translation(),
        frustum: frustum.copied(),
    };

    for mut landscape in &mut landscapes {
        landscape.update(&viewer);
    }
}
