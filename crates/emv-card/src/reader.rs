//! PC/SC card reader management

use std::ffi::{CStr, CString};

use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use tracing::{debug, info};

use crate::apdu::{CardTransport, TransportError};

/// Card reader wrapper for managing PC/SC connections
pub struct CardReader {
    context: Context,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_string_lossy().into_owned())
            .collect())
    }

    /// Connect to the first available reader
    pub fn connect_first(&self) -> Result<PcscTransport, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        match readers.next() {
            Some(reader) => self.connect(reader),
            None => Err(pcsc::Error::NoReadersAvailable),
        }
    }

    /// Connect to a reader by its exact name
    pub fn connect_by_name(&self, name: &str) -> Result<PcscTransport, pcsc::Error> {
        let reader = CString::new(name).map_err(|_| pcsc::Error::UnknownReader)?;
        self.connect(&reader)
    }

    /// Connect to a specific reader by name (CStr)
    pub fn connect(&self, reader_name: &CStr) -> Result<PcscTransport, pcsc::Error> {
        let card = self
            .context
            .connect(reader_name, ShareMode::Shared, Protocols::ANY)?;
        let name = reader_name.to_string_lossy().into_owned();
        info!(reader = %name, "connected to card");
        Ok(PcscTransport {
            card: Some(card),
            reader_name: name,
        })
    }
}

/// [`CardTransport`] over a PC/SC card connection
pub struct PcscTransport {
    card: Option<Card>,
    reader_name: String,
}

impl PcscTransport {
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    fn card(&self) -> Result<&Card, TransportError> {
        self.card.as_ref().ok_or(TransportError::Disconnected)
    }
}

impl CardTransport for PcscTransport {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let card = self.card()?;
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = card.transmit(command, &mut rapdu_buf)?;
        Ok(rapdu.to_vec())
    }

    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        let status = self.card()?.status2_owned()?;
        Ok(status.atr().to_vec())
    }

    fn disconnect(&mut self, reset: bool) -> Result<(), TransportError> {
        let Some(card) = self.card.take() else {
            return Ok(());
        };
        let disposition = if reset {
            Disposition::ResetCard
        } else {
            Disposition::LeaveCard
        };
        debug!(reader = %self.reader_name, reset, "disconnecting");
        card.disconnect(disposition).map_err(|(_, e)| TransportError::Pcsc(e))
    }
}
