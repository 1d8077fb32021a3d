pub mod authenticate;
pub mod card_info;
pub mod dump;
pub mod dump_all_tags;
pub mod get_challenge;
pub mod info;
pub mod info_formatter;
pub mod readers;
pub mod verify_pin;

use emv_ca_keys::CaKeyStore;
use emv_card::{Application, CardReader, DefaultTerminalData, EmvError, EmvSession, PcscTransport};
use emv_common::TagRegistry;
use tracing::{debug, info, warn};

use crate::config::CliConfig;
use crate::error::CliError;
use crate::formatters::{self, FormatMode};

/// Everything a command needs besides the card itself
pub struct Context {
    pub tags: TagRegistry,
    pub ca_keys: CaKeyStore,
    pub config: CliConfig,
    pub format: FormatMode,
    /// Application to select; the highest priority one when unset
    pub aid: Option<Vec<u8>>,
}

impl Context {
    pub fn new(config: CliConfig, format: FormatMode, aid: Option<Vec<u8>>) -> Result<Self, CliError> {
        let ca_keys = match &config.ca_keys {
            Some(path) => {
                let store = CaKeyStore::load(path)?;
                log_ca_keys(&store);
                store
            }
            None => {
                warn!("no CA key file configured, certificates cannot be verified");
                CaKeyStore::empty()
            }
        };

        Ok(Self {
            tags: TagRegistry::emv(),
            ca_keys,
            config,
            format,
            aid,
        })
    }

    /// Connect to the configured reader, or the first one
    pub fn connect(&self) -> Result<PcscTransport, CliError> {
        let reader = CardReader::new()?;
        let transport = match &self.config.reader {
            Some(name) => reader.connect_by_name(name)?,
            None => reader.connect_first()?,
        };
        println!("Reader: {}", transport.reader_name());
        Ok(transport)
    }

    pub fn session(&self, transport: PcscTransport) -> Result<EmvSession<'_, PcscTransport>, CliError> {
        let terminal = DefaultTerminalData::new(&self.config.terminal)?;
        let mut session = EmvSession::new(transport, &self.tags, &self.ca_keys)
            .with_config(self.config.session.clone())
            .with_terminal(terminal);
        if let Some(known_aids) = &self.config.known_aids {
            session = session.with_known_aids(known_aids.clone());
        }
        Ok(session)
    }

    /// Discover the card's applications and SELECT the chosen one
    pub fn select(&self, session: &mut EmvSession<'_, PcscTransport>) -> Result<Vec<u8>, CliError> {
        let card = session.init_card()?;
        let aid = match &self.aid {
            Some(aid) => aid.clone(),
            None => card
                .applications
                .first()
                .map(|app| app.aid.clone())
                .ok_or(EmvError::UnsupportedCard)?,
        };
        session.select_application(&aid)?;
        Ok(aid)
    }

    /// SELECT, then GET PROCESSING OPTIONS and read the AFL records
    pub fn process(&self, session: &mut EmvSession<'_, PcscTransport>) -> Result<Vec<u8>, CliError> {
        let aid = self.select(session)?;
        session.initiate_application_processing()?;
        Ok(aid)
    }
}

fn log_ca_keys(store: &CaKeyStore) {
    info!(keys = store.len(), "CA public keys loaded");
    for ca in store.authorities() {
        for key in ca.keys() {
            debug!(
                rid = %hex::encode_upper(ca.rid()),
                name = ca.name(),
                description = ca.description(),
                index = %format!("{:02X}", key.index),
                bits = key.modulus_len() * 8,
                "CA key"
            );
        }
    }
}

/// Display every data object of an application, named through the registry
pub(crate) fn display_tags(tags: &TagRegistry, app: &Application, mode: FormatMode) {
    for (tag, value) in &app.tags {
        println!(
            "  [{}] {}: {}",
            hex::encode_upper(tag),
            tags.name(tag),
            formatters::format_value(tags, tag, value, mode)
        );
    }
}
