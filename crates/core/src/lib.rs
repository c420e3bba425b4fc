#![deny(unused)]
//! Core types, traits, and error definitions for Codebox.
//!
//! This crate provides the building blocks shared by the sandbox engine,
//! the telemetry setup and the binary: the error taxonomy, layered
//! configuration, the filesystem/image-name policy and the tool surface
//! through which collaborators invoke the engine.

pub mod config;
pub mod error;
pub mod fs_policy;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
