//! Operator/front-end HTTP surface.
//!
//! Enqueue jobs, poll and list their state, cancel/retry, pre-materialize
//! manifests, and read health. This is the contract an interactive
//! front-end builds on: enqueue returns an id, `GET /jobs/{id}` is the
//! polling target, and cancel/retry mirror the repository semantics.

pub mod error;
pub mod models;
pub mod server;
pub mod services;
pub mod state;
pub mod utils;

pub use server::{router, run};
