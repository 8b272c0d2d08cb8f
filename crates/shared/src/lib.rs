//! Staffly Shared Types and Utilities
//!
//! Types and database helpers shared by the billing engine and the background worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
