#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod client;
pub mod server;
mod session;

pub use client::{ClientError, Response, SmtpClient};
pub use server::{Frontend, FrontendConfig, MessageHandler, SpooledMessage, Verdict};
