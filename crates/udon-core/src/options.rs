//! Runtime configuration

use semver::{Version, VersionReq};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use udon_bytecode::INSTRUCTION_SET_ID;

/// Default operand stack limit (in addresses)
pub const DEFAULT_MAX_STACK_DEPTH: usize = 1024 * 64;

/// Default limit on entry points running inside one another
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 256;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum OptionsError {
    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config text is not valid TOML or has wrongly typed fields
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Options shared by every VM a runtime constructs
///
/// ```toml
/// instruction_set_id = "UDON"
/// instruction_set_version = "^1"
/// max_stack_depth = 4096
/// max_nesting_depth = 64
/// allow_network_events = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeOptions {
    /// Instruction set identifier programs must declare
    pub instruction_set_id: String,

    /// Accepted instruction set versions
    pub instruction_set_version: VersionReq,

    /// Maximum operand stack depth per VM
    pub max_stack_depth: usize,

    /// Maximum number of nested entry point runs across the runtime
    pub max_nesting_depth: usize,

    /// Whether behaviours may request network relay of events
    pub allow_network_events: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            instruction_set_id: INSTRUCTION_SET_ID.to_string(),
            instruction_set_version: VersionReq {
                comparators: vec![semver::Comparator {
                    op: semver::Op::Caret,
                    major: 1,
                    minor: None,
                    patch: None,
                    pre: semver::Prerelease::EMPTY,
                }],
            },
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            allow_network_events: true,
        }
    }
}

impl RuntimeOptions {
    /// Parse options from TOML text; missing fields keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, OptionsError> {
        Ok(toml::from_str(text)?)
    }

    /// Read options from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check whether a program targeting `id`/`version` may run
    pub fn supports(&self, id: &str, version: &Version) -> bool {
        id == self.instruction_set_id && self.instruction_set_version.matches(version)
    }
}
