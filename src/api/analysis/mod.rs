pub mod dto;
pub mod errors;
pub mod handlers;

pub use handlers::analysis_config;
