#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod envelope;
pub mod logging;
pub mod mime;
pub mod policy;
pub mod session;
pub mod status;

pub use tracing;

/// Control signal broadcast to every long-running component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
