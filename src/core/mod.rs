//! Core domain models for the runner
//!
//! This module defines the configuration format and the data structures
//! that represent pipelines, jobs, steps and their execution state.

pub mod condition;
pub mod config;
pub mod context;
pub mod job;
pub mod pipeline;
pub mod state;
pub mod step;

pub use condition::*;
pub use context::*;
pub use job::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
