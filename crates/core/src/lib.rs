//! Job engine core: the job model, storage and source ports, and the
//! services that claim, run and settle jobs.
//!
//! Nothing here talks to a database or the filesystem directly; the
//! `jobflow-infra-*` crates implement the ports in [`port`].

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};
