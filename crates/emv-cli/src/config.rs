//! Optional TOML configuration file
//!
//! ```toml
//! ca_keys = "/etc/emv/ca-public-keys.txt"
//! reader = "ACS ACR39U ICC Reader 00 00"
//!
//! [session]
//! warm_up_ms = 200
//! probe_master_file = true
//!
//! [terminal]
//! country_code = "0826"
//! currency_code = "0826"
//!
//! [[known_aids]]
//! aid = "A0000000041010"
//! name = "Mastercard"
//! partial_match = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use emv_card::{KnownAid, SessionConfig, TerminalConfig};
use serde::Deserialize;

use crate::error::CliError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// CA public key file
    pub ca_keys: Option<PathBuf>,
    /// Reader to connect to; the first reader when unset
    pub reader: Option<String>,
    pub session: SessionConfig,
    pub terminal: TerminalConfig,
    /// Replaces the built-in candidate list for fallback discovery
    pub known_aids: Option<Vec<KnownAid>>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|source| CliError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
