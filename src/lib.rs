#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
#![deny(unsafe_code)]
#![deny(clippy::all)]

#[cfg(feature = "runner")]
pub mod runner;

// Re-exports
pub use sluice_core as core;
pub use sluice_runtime as runtime;

/// The commonly used surface in one import.
pub mod prelude {
    pub use sluice_core::{
        ComponentKey, ConnectionSpec, Mutation, Record, ReactionKey, Value,
    };
    pub use sluice_runtime::{
        mutate_array, mutate_dict, Attribute, Class, ClassBuilder, Event, Init, Property,
        RuntimeError, Stage,
    };

    #[cfg(feature = "runner")]
    pub use crate::runner::{Runner, RunnerConfig, RunnerHandle};
}
