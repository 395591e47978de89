//! Avatar conductor
//!
//! Coordinates a conversational front-end with an embedded avatar runtime
//! that is only reachable through fire-and-forget message passing. Every
//! component is a plain owned value; the [`runtime::Conductor`] wires one
//! instance of each together and drives them from a single event loop.

pub mod bridge;
pub mod config;
pub mod db;
pub mod effect;
pub mod error;
pub mod host;
pub mod ids;
pub mod introduction;
pub mod lifecycle;
pub mod memory;
pub mod protocol;
pub mod readiness;
pub mod relationship;
pub mod runtime;
pub mod signal;
pub mod visitor;

pub use config::ConductorConfig;
pub use error::{BridgeError, ConductorError};
pub use runtime::{Conductor, Event};
