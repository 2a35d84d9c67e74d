//! research-scout: passive background research for assistant sessions.
//!
//! The crate is a decision/control plane with three coupled jobs:
//!
//! 1. Decide *when* research is worth running ([`trigger`]).
//! 2. Run it under resource limits ([`queue`] + [`research`]).
//! 3. Decide *what, if anything* of the result is worth surfacing back
//!    into the session ([`scoring`] + [`injection`]).
//!
//! Actual search connectors and text-generation providers live behind the
//! narrow traits in [`specialist`] and [`generator`] so they can be swapped
//! (or faked deterministically in tests) without touching the control logic.

pub mod config;
pub mod error;
pub mod generator;
pub mod injection;
pub mod logging;
pub mod models;
pub mod queue;
pub mod research;
pub mod scoring;
pub mod specialist;
pub mod store;
pub mod trigger;

pub use config::Config;
pub use error::{Error, Result};
pub use store::Database;
