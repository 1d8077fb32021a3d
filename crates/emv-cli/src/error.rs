use std::path::PathBuf;

use emv_ca_keys::CaKeyError;
use emv_card::{EmvError, PcscError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] PcscError),

    #[error(transparent)]
    Emv(#[from] EmvError),

    #[error("CA key file: {0}")]
    CaKeys(#[from] CaKeyError),

    #[error("failed to read {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid argument: {0}")]
    Usage(String),
}
