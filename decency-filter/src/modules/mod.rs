//! Concrete filter modules shipped with the daemon.
//!
//! Both delegate the actual classification to an external program via
//! [`CmdFilter`](crate::cmd::CmdFilter); the specific command-line
//! conventions of any one scanner stay in the configuration.

pub mod antivirus;
pub mod command;

pub use antivirus::{VirusFilter, VirusFilterConfig};
pub use command::{CommandFilter, CommandFilterConfig};
