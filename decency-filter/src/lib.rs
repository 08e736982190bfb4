#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod cmd;
pub mod config;
pub mod module;
pub mod modules;
pub mod scoring;
pub mod signal;
pub mod train;

pub use cmd::{CmdFilter, CmdOutput, CommandSpec};
pub use config::{ModuleInitError, ModuleSettings};
pub use module::{CorpusLabel, FilterModule, Trainable, contribute};
pub use scoring::{PolicyScoringVerifier, ScoringPayload};
pub use signal::FilterSignal;
