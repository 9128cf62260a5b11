//! Error module orchestrator.
//!
//! The concrete error enum lives in `types`; downstream code imports it from here.

mod types;

pub use types::{Result, StageError};
