pub mod database;
pub mod health_checker;
pub mod log_writer;

pub use database::Database;
