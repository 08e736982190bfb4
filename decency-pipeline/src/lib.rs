#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod correlate;
pub mod disposition;
pub mod engine;
pub mod notify;
pub mod reinject;

pub use correlate::ScoringConfig;
pub use disposition::DispositionEngine;
pub use engine::PipelineEngine;
pub use notify::Notifier;
pub use reinject::{ReinjectConfig, ReinjectError, Reinjector};
