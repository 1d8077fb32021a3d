//! EMV Card - Smart card reading and EMV protocol implementation
//!
//! This crate drives a contact EMV card through application discovery,
//! selection, record reading and offline data authentication. The card is
//! reached through any [`CardTransport`]; [`PcscTransport`] binds it to a
//! PC/SC reader.
//!
//! ```no_run
//! use emv_ca_keys::CaKeyStore;
//! use emv_card::{CardReader, EmvSession};
//! use emv_common::TagRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tags = TagRegistry::emv();
//! let ca_keys = CaKeyStore::load("ca-public-keys.txt")?;
//! let transport = CardReader::new()?.connect_first()?;
//!
//! let mut session = EmvSession::new(transport, &tags, &ca_keys);
//! let aids: Vec<Vec<u8>> = session.init_card()?.aids().map(<[u8]>::to_vec).collect();
//! session.select_application(&aids[0])?;
//! session.initiate_application_processing()?;
//! println!("{}", session.internal_authenticate()?.is_valid());
//! # Ok(())
//! # }
//! ```

pub mod apdu;
pub mod application;
pub mod card;
pub mod crypto;
pub mod dump;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod terminal;

pub use apdu::{send_apdu, ApduCommand, ApduResponse, CardTransport, StatusWord, TransportError};
pub use application::{AflEntry, Aip, Application, Dol, DolEntry, LogEntry, Record};
pub use card::{Card, Directory, DirectoryKind, InterfaceType};
pub use crypto::{
    AuthenticationMethod, AuthenticationOutcome, CertificateFailure, CertificateState,
    CertificateVerificationResult, DynamicData, IccPublicKeyCertificate,
    IssuerPublicKeyCertificate, RecoveredPublicKey, SignedStaticData,
};
pub use dump::CardDump;
pub use error::{EmvError, Result};
pub use protocol::{EmvSession, PinVerification, SessionConfig, SessionState};
pub use reader::{CardReader, PcscTransport};
pub use terminal::{default_known_aids, DefaultTerminalData, KnownAid, TerminalConfig, TerminalDataProvider};

/// Re-export commonly used types
pub use pcsc::Error as PcscError;
