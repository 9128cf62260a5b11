//! Layout module orchestrator.
//!
//! Callers import the layout decision types from here while the derivation
//! lives in the private `selector` module.

mod selector;

pub use selector::{LayoutMode, StageLayout, select_layout};
