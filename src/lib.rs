//! Validation and print analysis of triangulated meshes.
//!
//! Uploaded meshes are checked structurally, then handed to a background
//! pipeline that slices them with an external engine inside a job-scoped
//! workspace and extracts material and time estimates from the output.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod files;
pub mod geometry;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod slicer;
pub mod telemetry;
pub mod worker;
pub mod workspace;
