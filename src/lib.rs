//! Review Assigner - reviewer assignment service for team pull requests.
//!
//! Teams own users; users author pull requests; every new pull request gets
//! up to two random active teammates as reviewers. The library exposes the
//! domain models, the persistence gateway with SQLite and in-memory
//! implementations, the assignment services and the HTTP layer.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;
