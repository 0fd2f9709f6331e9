pub mod engine;
pub mod engine_config;
pub mod runner;
pub mod settings;

pub use engine::{EngineError, EngineOutput, SlicingEngine};
pub use engine_config::EngineConfig;
pub use runner::{EngineMode, PrusaSlicerRunner, RunnerConfig};
pub use settings::{BedAdhesion, InfillPattern, MaterialType, PrintSettings};
