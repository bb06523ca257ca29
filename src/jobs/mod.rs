// Background job tracking
pub mod pulls;
pub mod registry;
pub mod training;

pub use pulls::ModelPulls;
pub use registry::JobRegistry;
pub use training::{TrainingRunner, TRAINING_JOB_KEY};
