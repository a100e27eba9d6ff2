pub mod colormap;
pub mod dataset;
pub mod prepare;
pub mod scalar_field;
pub mod types;

pub use dataset::{TractDataset, TractRange};
pub use prepare::{prepare, ColorSource, PreparedTubes};
pub use scalar_field::ScalarField;
pub use types::{Aabb, SceneUniforms, TubeVertexGpu};
