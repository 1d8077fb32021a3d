//! Error taxonomy for card sessions

use emv_common::TlvError;
use thiserror::Error;

use crate::apdu::{StatusWord, TransportError};

pub type Result<T> = std::result::Result<T, EmvError>;

/// Errors surfaced by a card session
///
/// Certificate problems are not errors: they are recorded as certificate
/// state and reported through the verification result.
#[derive(Debug, Error)]
pub enum EmvError {
    /// Reader or connection failure; the session cannot continue
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Status word outside the success path of the current step
    #[error("{command} failed with status {status}")]
    CardProtocol {
        command: &'static str,
        status: StatusWord,
    },

    /// Card data that violates TLV or length invariants
    #[error("malformed card data: {0}")]
    MalformedData(String),

    /// No application could be discovered on the card
    #[error("no supported EMV application found on card")]
    UnsupportedCard,

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<TlvError> for EmvError {
    fn from(err: TlvError) -> Self {
        EmvError::MalformedData(err.to_string())
    }
}
