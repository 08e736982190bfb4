#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod controller;

pub use controller::{CacheConfig, Decency, ModuleSpec};
