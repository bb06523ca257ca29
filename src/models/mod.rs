// Data models (structs)
pub mod job;
pub mod settings;
pub mod telemetry;
pub mod training;

pub use job::*;
pub use settings::*;
pub use telemetry::*;
pub use training::*;
