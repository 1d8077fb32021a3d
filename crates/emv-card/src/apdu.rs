//! APDU (Application Protocol Data Unit) command handling
//!
//! [`send_apdu`] owns the T=0 procedure-byte accommodations: `61xx` is
//! followed by GET RESPONSE until the card stops announcing more data, and
//! `6Cxx` triggers a single resend of the original command with the corrected
//! Le. Every other status word is a valid outcome returned to the caller.

use std::fmt;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::error::EmvError;

/// Reader or connection level failure
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("response of {0} byte(s) is too short to carry a status word")]
    ShortResponse(usize),

    #[error("card is not connected")]
    Disconnected,
}

/// Raw byte exchange with a card
///
/// Implementations only move bytes. Status words are never errors at this
/// level; only a failing reader or a removed card is.
pub trait CardTransport {
    /// Send command bytes and return the response bytes including SW1 SW2
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Answer To Reset of the connected card
    fn atr(&self) -> Result<Vec<u8>, TransportError>;

    /// Release the card, optionally resetting it
    fn disconnect(&mut self, reset: bool) -> Result<(), TransportError>;

    /// Send a command and split the status word off the response
    fn transmit(&mut self, command: &[u8]) -> Result<ApduResponse, TransportError> {
        trace!(command = %hex::encode_upper(command), "C-APDU");
        let raw = match self.transmit_raw(command) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "transport error during transmission");
                return Err(e);
            }
        };
        trace!(response = %hex::encode_upper(&raw), "R-APDU");
        ApduResponse::from_raw(&raw)
    }
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit_raw(command)
    }

    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        (**self).atr()
    }

    fn disconnect(&mut self, reset: bool) -> Result<(), TransportError> {
        (**self).disconnect(reset)
    }
}

/// ISO/IEC 7816-4 status word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatusWord(u16);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    /// Authentication method blocked (PIN try limit exceeded)
    pub const AUTH_METHOD_BLOCKED: StatusWord = StatusWord(0x6983);
    /// File or application not found
    pub const FILE_NOT_FOUND: StatusWord = StatusWord(0x6A82);
    pub const RECORD_NOT_FOUND: StatusWord = StatusWord(0x6A83);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        StatusWord(((sw1 as u16) << 8) | sw2 as u16)
    }

    pub fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn sw2(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Remaining PIN tries for a `63Cx` response
    pub fn retries_remaining(self) -> Option<u8> {
        match self.0 {
            0x63C0..=0x63CF => Some((self.0 & 0x0F) as u8),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self.0 {
            0x9000 => "Success",
            0x6100..=0x61FF => "Response bytes still available",
            0x6281 => "Part of returned data may be corrupted",
            0x6283 => "Selected file invalidated",
            0x63C0..=0x63CF => "Verification failed, counter provided",
            0x6700 => "Wrong length",
            0x6981 => "Command incompatible with file structure",
            0x6982 => "Security status not satisfied",
            0x6983 => "Authentication method blocked",
            0x6984 => "Referenced data invalidated",
            0x6985 => "Conditions of use not satisfied",
            0x6A81 => "Function not supported",
            0x6A82 => "File or application not found",
            0x6A83 => "Record not found",
            0x6A86 => "Incorrect parameters P1-P2",
            0x6A88 => "Referenced data not found",
            0x6C00..=0x6CFF => "Wrong Le field",
            0x6D00 => "Instruction code not supported",
            0x6E00 => "Class not supported",
            _ => "Unknown status",
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X} ({})", self.0, self.as_str())
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        StatusWord(value)
    }
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    pub fn new(data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        Self { data, sw1, sw2 }
    }

    /// Split raw response bytes into data and status word
    pub fn from_raw(raw: &[u8]) -> Result<Self, TransportError> {
        if raw.len() < 2 {
            return Err(TransportError::ShortResponse(raw.len()));
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self::new(data.to_vec(), sw[0], sw[1]))
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    pub fn sw(&self) -> StatusWord {
        StatusWord::new(self.sw1, self.sw2)
    }
}

/// Upper bound on chained GET RESPONSE commands for one exchange
const MAX_GET_RESPONSES: usize = 64;

/// Send an APDU command and assemble the complete response
pub fn send_apdu<T: CardTransport + ?Sized>(
    transport: &mut T,
    apdu: &[u8],
) -> Result<ApduResponse, TransportError> {
    let mut response = transport.transmit(apdu)?;

    if response.sw1 == 0x6C {
        debug!(le = response.sw2, "wrong Le, resending with corrected length");
        let resend = with_le(apdu, response.sw2);
        response = transport.transmit(&resend)?;
    }

    let mut data = std::mem::take(&mut response.data);
    for _ in 0..MAX_GET_RESPONSES {
        if response.sw1 != 0x61 {
            break;
        }
        response = transport.transmit(&commands::get_response(response.sw2).encode())?;
        data.append(&mut response.data);
    }
    if response.sw1 == 0x61 {
        warn!(limit = MAX_GET_RESPONSES, "card keeps announcing more data, giving up");
    }
    response.data = data;

    Ok(response)
}

/// Replace the Le byte of a short command, or append one if it has none
fn with_le(apdu: &[u8], le: u8) -> Vec<u8> {
    let has_le = match apdu.len() {
        0..=4 => false,
        5 => true,
        len => len == 6 + apdu[4] as usize,
    };

    let mut out = apdu.to_vec();
    if has_le {
        out.pop();
    }
    out.push(le);
    out
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes
    ///
    /// Short APDUs only: command data must fit a single Lc byte.
    pub fn build(&self) -> Result<Vec<u8>, EmvError> {
        if self.data.len() > 0xFF {
            return Err(EmvError::InvalidInput(format!(
                "command data of {} bytes does not fit a short APDU",
                self.data.len()
            )));
        }
        Ok(self.encode())
    }

    fn encode(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }

    /// Send this command to the card
    pub fn send<T: CardTransport + ?Sized>(&self, transport: &mut T) -> Result<ApduResponse, EmvError> {
        Ok(send_apdu(transport, &self.build()?)?)
    }
}

/// Common EMV APDU commands
pub mod commands {
    use emv_common::BerTlv;

    use super::ApduCommand;
    use crate::error::EmvError;

    /// SELECT command (by name/AID)
    pub fn select(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x00)
            .data(aid.to_vec())
            .le(0x00)
    }

    /// SELECT next occurrence of a partially matched DF name
    pub fn select_next(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x02).data(aid.to_vec())
    }

    /// SELECT the master file (3F00) by file identifier
    pub fn select_master_file() -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x00, 0x00)
            .data(vec![0x3F, 0x00])
            .le(0x00)
    }

    /// READ RECORD command; SFIs outside 1..=30 cannot be addressed
    pub fn read_record(record_number: u8, sfi: u8) -> Result<ApduCommand, EmvError> {
        if !(1..=30).contains(&sfi) {
            return Err(EmvError::MalformedData(format!("SFI {} outside 1..=30", sfi)));
        }
        let p2 = (sfi << 3) | 0x04;
        Ok(ApduCommand::new(0x00, 0xB2, record_number, p2).le(0x00))
    }

    pub fn get_response(le: u8) -> ApduCommand {
        ApduCommand::new(0x00, 0xC0, 0x00, 0x00).le(le)
    }

    /// GET PROCESSING OPTIONS command, wrapping the PDOL data in tag 83
    pub fn get_processing_options(pdol_data: &[u8]) -> ApduCommand {
        ApduCommand::new(0x80, 0xA8, 0x00, 0x00)
            .data(BerTlv::new([0x83], pdol_data).to_bytes())
            .le(0x00)
    }

    /// INTERNAL AUTHENTICATE command (for DDA)
    pub fn internal_authenticate(data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x00, 0x88, 0x00, 0x00)
            .data(data)
            .le(0x00)
    }

    /// GET DATA command - request specific data object from card
    pub fn get_data(tag: &[u8]) -> ApduCommand {
        let (p1, p2) = match *tag {
            [t] => (0x00, t),
            [.., a, b] => (a, b),
            [] => (0x00, 0x00),
        };
        ApduCommand::new(0x80, 0xCA, p1, p2).le(0x00)
    }

    /// GET CHALLENGE command (8 byte card random)
    pub fn get_challenge() -> ApduCommand {
        ApduCommand::new(0x00, 0x84, 0x00, 0x00).le(0x00)
    }

    /// VERIFY command with a plaintext PIN block
    pub fn verify_plaintext(pin_block: [u8; 8]) -> ApduCommand {
        ApduCommand::new(0x00, 0x20, 0x00, 0x80).data(pin_block.to_vec())
    }
}
