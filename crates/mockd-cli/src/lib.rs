//! # mockd engine
//!
//! Library half of the `mockd` binary: the [`server::Engine`] assembles
//! the catalogue, the protocol dataplane, the admin control plane and
//! per-mock sub-servers, and owns graceful shutdown.

pub mod server;

pub use server::{Engine, EngineConfig};
