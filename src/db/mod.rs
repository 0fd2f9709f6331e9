pub mod connection;
pub mod job_repository;
pub mod migrations;
pub mod models;
pub mod result_repository;

pub use job_repository::{PgJobQueue, PgJobStore};
pub use result_repository::PgResultStore;
