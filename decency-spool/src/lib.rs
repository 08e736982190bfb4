#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod dirs;
pub mod error;

pub use cache::{CacheStore, FileCache, MemoryCache, QueueCache, QueueEntry, DEFAULT_TTL};
pub use dirs::{Sidecar, SpoolDirs};
pub use error::{CacheError, Result, SpoolError};
