use serde::Deserialize;
use thiserror::Error;

/// Configuration errors caught while a module is constructed. These are
/// the only fatal errors in the filter layer: a daemon with a broken
/// module config refuses to start.
#[derive(Debug, Error)]
pub enum ModuleInitError {
    #[error("Module {module}: empty command for {what}")]
    EmptyCommand { module: String, what: &'static str },

    #[error("Module {module}: invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        module: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("Scoring verify key {path}: {reason}")]
    VerifyKey { path: String, reason: String },
}

/// Settings every filter module carries, immutable after init.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    pub name: String,
    /// Seconds a single `handle` invocation may run; 0 disables the guard.
    pub timeout: u64,
    /// Skip messages larger than this many bytes; 0 disables the guard.
    pub max_size: u64,
    pub disable: bool,
    pub disable_train: bool,
    /// Score delta applied when the module says "spam".
    pub weight_spam: f64,
    /// Score delta applied when the module says "innocent".
    pub weight_innocent: f64,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            timeout: 30,
            max_size: 0,
            disable: false,
            disable_train: false,
            weight_spam: -100.0,
            weight_innocent: 10.0,
        }
    }
}
