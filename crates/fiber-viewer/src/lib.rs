//! Tube renderer for fiber tractography.
//!
//! Tracts are drawn as ray-cast tubes, either opaque with ambient occlusion from a
//! voxelized density volume, or transparent after a GPU radix sort by eye distance.
//! A scalar field can additionally be shown by direct volume rendering.

pub mod app;
pub mod camera;
pub mod config;
pub mod data;
pub mod density;
pub mod renderer;
pub mod settings;
pub mod sort;
pub mod ui;
