//! EMV protocol implementation
//!
//! [`EmvSession`] drives one card through discovery, selection, processing
//! and offline authentication:
//!
//! ```text
//! Init → [WarmUp] → [MasterFileProbe] → DirectoryDiscovery → CandidateListBuild
//!      → Selected → ProcessingInitiated → RecordsRead → [Authenticated] → Done
//! ```
//!
//! Transport failures end the session. Card protocol and data errors end the
//! current step only; the caller may select another application.

use std::thread;
use std::time::Duration;

use emv_ca_keys::CaKeyStore;
use emv_common::tags::ids;
use emv_common::util::digits_to_bcd;
use emv_common::{find_tag, TagRegistry, TlvReader};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::apdu::{commands, ApduCommand, ApduResponse, CardTransport, StatusWord};
use crate::application::{counter_value, parse_application_templates, parse_directory_record, Application};
use crate::card::{directories, Card, Directory, DirectoryKind, InterfaceType};
use crate::crypto::{verify_signed_dynamic_data, AuthenticationOutcome, CertificateFailure, CertificateState};
use crate::dump::CardDump;
use crate::error::{EmvError, Result};
use crate::terminal::{default_known_aids, DefaultTerminalData, KnownAid, TerminalDataProvider};

/// Upper bound on SELECT next occurrence rounds for one candidate AID
const MAX_NEXT_OCCURRENCES: usize = 32;

/// Session behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Blocking delay before the first command, in milliseconds
    pub warm_up_ms: u64,
    /// SELECT the master file before directory discovery
    pub probe_master_file: bool,
    /// Read the transaction log in `read_additional_data`
    pub read_transaction_log: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warm_up_ms: 0,
            probe_master_file: false,
            read_transaction_log: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    WarmUp,
    MasterFileProbe,
    DirectoryDiscovery,
    CandidateListBuild,
    Selected,
    ProcessingInitiated,
    RecordsRead,
    Authenticated,
    Done,
}

/// Outcome of a VERIFY command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinVerification {
    Verified,
    WrongPin { tries_remaining: u8 },
    Blocked,
}

/// One card session over a transport
pub struct EmvSession<'a, T: CardTransport> {
    transport: T,
    tags: &'a TagRegistry,
    ca_keys: &'a CaKeyStore,
    terminal: Box<dyn TerminalDataProvider + 'a>,
    known_aids: Vec<KnownAid>,
    config: SessionConfig,
    state: SessionState,
    card: Option<Card>,
}

impl<'a, T: CardTransport> EmvSession<'a, T> {
    pub fn new(transport: T, tags: &'a TagRegistry, ca_keys: &'a CaKeyStore) -> Self {
        Self {
            transport,
            tags,
            ca_keys,
            terminal: Box::new(DefaultTerminalData::default()),
            known_aids: default_known_aids(),
            config: SessionConfig::default(),
            state: SessionState::Init,
            card: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_terminal(mut self, terminal: impl TerminalDataProvider + 'a) -> Self {
        self.terminal = Box::new(terminal);
        self
    }

    pub fn with_known_aids(mut self, known_aids: Vec<KnownAid>) -> Self {
        self.known_aids = known_aids;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Card model, available once `init_card` has read the ATR
    pub fn card(&self) -> Option<&Card> {
        self.card.as_ref()
    }

    pub fn into_card(self) -> Option<Card> {
        self.card
    }

    /// Structured dump of everything parsed so far
    pub fn dump(&self) -> Option<CardDump<'_>> {
        self.card.as_ref().map(|card| CardDump::new(card, self.tags))
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn send(&mut self, command: ApduCommand) -> Result<ApduResponse> {
        command.send(&mut self.transport)
    }

    /// Discover the applications on the card
    ///
    /// Fails with [`EmvError::UnsupportedCard`] when nothing is found; the
    /// card (and its ATR) is still available through [`EmvSession::card`].
    pub fn init_card(&mut self) -> Result<&Card> {
        if self.config.warm_up_ms > 0 {
            self.transition(SessionState::WarmUp);
            thread::sleep(Duration::from_millis(self.config.warm_up_ms));
        }

        let mut card = Card::new(self.transport.atr()?);
        info!(atr = %hex::encode_upper(&card.atr), "card present");

        if self.config.probe_master_file {
            self.transition(SessionState::MasterFileProbe);
            let response = self.send(commands::select_master_file())?;
            if response.is_success() {
                card.master_file = Some(response.data);
            } else {
                debug!(status = %response.sw(), "no master file");
            }
        }

        self.transition(SessionState::DirectoryDiscovery);
        let mut applications = match self.discover_directory(&mut card) {
            Ok(apps) => apps,
            Err(e @ EmvError::CardProtocol { .. }) => {
                warn!(error = %e, "directory discovery failed");
                Vec::new()
            }
            Err(e) => {
                self.card = Some(card);
                return Err(e);
            }
        };

        self.transition(SessionState::CandidateListBuild);
        if applications.is_empty() {
            applications = self.search_known_aids()?;
        }

        for app in &applications {
            info!(aid = %hex::encode_upper(&app.aid), name = %app.name(), "found application");
        }
        card.applications = applications;
        card.sort_by_priority();

        let card = self.card.insert(card);
        if card.applications.is_empty() {
            warn!("no EMV application found");
            return Err(EmvError::UnsupportedCard);
        }
        Ok(card)
    }

    fn discover_directory(&mut self, card: &mut Card) -> Result<Vec<Application>> {
        let mut kind = DirectoryKind::Pse;
        let mut response = self.send(commands::select(directories::PSE))?;

        if !response.is_success() {
            debug!(status = %response.sw(), "PSE not available, trying PPSE");
            kind = DirectoryKind::Ppse;
            response = self.send(commands::select(directories::PPSE))?;
            if !response.is_success() {
                debug!(status = %response.sw(), "no payment system directory");
                return Ok(Vec::new());
            }
            card.interface = InterfaceType::Contactless;
        }

        let fci = response.data;
        match TlvReader::new(&fci).next_tlv()? {
            Some(tlv) if tlv.tag() == ids::FCI_TEMPLATE.bytes() => {}
            _ => return Err(EmvError::MalformedData("directory response is not an FCI".into())),
        }

        let sfi = find_tag(&fci, ids::SHORT_FILE_IDENTIFIER.bytes()).and_then(|v| v.first().copied());
        debug!(?kind, ?sfi, "directory selected");
        card.directory = Some(Directory {
            kind,
            sfi,
            fci: fci.clone(),
        });

        match sfi {
            Some(sfi) => {
                let mut apps = Vec::new();
                for (_, record) in self.read_record_file(sfi, None)? {
                    apps.extend(parse_directory_record(&record)?);
                }
                Ok(apps)
            }
            None if kind == DirectoryKind::Ppse => {
                let entries = find_tag(&fci, ids::FCI_ISSUER_DISCRETIONARY_DATA.bytes()).unwrap_or_default();
                parse_application_templates(&entries)
            }
            None => Err(EmvError::MalformedData("directory FCI names no SFI".into())),
        }
    }

    /// READ RECORD 1, 2, … from `sfi` until 6A83 or `limit` records
    fn read_record_file(&mut self, sfi: u8, limit: Option<u8>) -> Result<Vec<(u8, Vec<u8>)>> {
        let mut records = Vec::new();
        for number in 1..=limit.unwrap_or(u8::MAX) {
            let response = self.send(commands::read_record(number, sfi)?)?;
            if response.sw() == StatusWord::RECORD_NOT_FOUND {
                break;
            }
            if !response.is_success() {
                return Err(EmvError::CardProtocol {
                    command: "READ RECORD",
                    status: response.sw(),
                });
            }
            records.push((number, response.data));
        }
        debug!(sfi, count = records.len(), "records read");
        Ok(records)
    }

    /// Fallback discovery: SELECT every known AID
    fn search_known_aids(&mut self) -> Result<Vec<Application>> {
        let mut found: Vec<Application> = Vec::new();

        for candidate in self.known_aids.clone() {
            let response = self.send(commands::select(&candidate.aid))?;
            if !response.is_success() {
                debug!(aid = %hex::encode_upper(&candidate.aid), status = %response.sw(), "not on card");
                continue;
            }

            let apps = match self.collect_occurrences(&candidate, response.data) {
                Ok(apps) => apps,
                Err(EmvError::Transport(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(aid = %hex::encode_upper(&candidate.aid), error = %e, "skipping candidate");
                    continue;
                }
            };

            for app in apps {
                if !found.iter().any(|f| f.aid == app.aid) {
                    found.push(app);
                }
            }
        }

        Ok(found)
    }

    /// Parse the first FCI and, for partial matches, every next occurrence
    fn collect_occurrences(&mut self, candidate: &KnownAid, first: Vec<u8>) -> Result<Vec<Application>> {
        let mut apps = vec![Application::from_fci(&first)?];
        if !candidate.partial_match {
            return Ok(apps);
        }

        let mut previous = first;
        for _ in 0..MAX_NEXT_OCCURRENCES {
            let response = self.send(commands::select_next(&candidate.aid))?;
            if response.sw() == StatusWord::FILE_NOT_FOUND {
                break;
            }
            if !response.is_success() {
                return Err(EmvError::CardProtocol {
                    command: "SELECT next occurrence",
                    status: response.sw(),
                });
            }
            if response.data == previous {
                warn!(aid = %hex::encode_upper(&candidate.aid), "card repeated its previous SELECT response");
                break;
            }
            apps.push(Application::from_fci(&response.data)?);
            previous = response.data;
        }

        Ok(apps)
    }

    /// SELECT an application and merge its FCI
    pub fn select_application(&mut self, aid: &[u8]) -> Result<&Application> {
        let card = self
            .card
            .as_ref()
            .ok_or(EmvError::InvalidState("card not initialised"))?;
        if card.selected_application().is_some_and(|a| a.aid == aid) {
            return Err(EmvError::InvalidState("application already selected"));
        }

        let response = self.send(commands::select(aid))?;
        if !response.is_success() {
            return Err(EmvError::CardProtocol {
                command: "SELECT",
                status: response.sw(),
            });
        }

        let card = self
            .card
            .as_mut()
            .ok_or(EmvError::InvalidState("card not initialised"))?;
        let index = match card.applications.iter().position(|a| a.aid == aid) {
            Some(index) => index,
            None => {
                card.applications.push(Application::new(aid));
                card.applications.len() - 1
            }
        };
        card.applications[index].apply_fci(&response.data)?;
        card.selected = Some(index);

        self.transition(SessionState::Selected);
        self.selected()
    }

    fn selected(&self) -> Result<&Application> {
        self.card
            .as_ref()
            .and_then(Card::selected_application)
            .ok_or(EmvError::InvalidState("no application selected"))
    }

    /// GET PROCESSING OPTIONS and read every record the AFL names
    ///
    /// A failure marks the application as failed; the session carries on.
    pub fn initiate_application_processing(&mut self) -> Result<&Application> {
        let app = self
            .card
            .as_mut()
            .and_then(Card::selected_application_mut)
            .ok_or(EmvError::InvalidState("no application selected"))?;
        if app.aip.is_some() {
            return Err(EmvError::InvalidState("processing already initiated"));
        }

        let pdol_data = app
            .pdol
            .as_ref()
            .map(|pdol| pdol.build(&*self.terminal, self.tags))
            .unwrap_or_default();

        let outcome = process_application(&mut self.transport, app, &pdol_data);
        if let Err(e) = &outcome {
            warn!(aid = %hex::encode_upper(&app.aid), error = %e, "application processing failed");
            app.processing_failure = Some(e.to_string());
        }
        outcome?;

        self.transition(SessionState::ProcessingInitiated);
        self.transition(SessionState::RecordsRead);
        self.selected()
    }

    /// INTERNAL AUTHENTICATE and validate the signed dynamic data
    ///
    /// Only attempted when the AIP declares DDA and an ICC certificate was
    /// read; otherwise the outcome is `NotAttempted`.
    pub fn internal_authenticate(&mut self) -> Result<AuthenticationOutcome> {
        let app = self
            .card
            .as_mut()
            .and_then(Card::selected_application_mut)
            .ok_or(EmvError::InvalidState("no application selected"))?;
        let aip = app
            .aip
            .ok_or(EmvError::InvalidState("processing not initiated"))?;

        if !aip.supports_dda() {
            let outcome = AuthenticationOutcome::NotAttempted("card does not support DDA");
            app.authentication = Some(outcome.clone());
            return Ok(outcome);
        }
        if app.icc_certificate.is_none() {
            let outcome = AuthenticationOutcome::NotAttempted("no ICC public key certificate");
            app.authentication = Some(outcome.clone());
            return Ok(outcome);
        }

        app.validate_certificates(self.ca_keys);
        let icc_key = match app.icc_certificate.as_ref().map(|c| c.state()) {
            Some(CertificateState::Valid(key)) => key.clone(),
            Some(CertificateState::Invalid(f)) => {
                let outcome = AuthenticationOutcome::Invalid(f.clone());
                app.authentication = Some(outcome.clone());
                return Ok(outcome);
            }
            _ => {
                let outcome = AuthenticationOutcome::Invalid(CertificateFailure::IccKeyUnavailable);
                app.authentication = Some(outcome.clone());
                return Ok(outcome);
            }
        };

        let ddol_data = match &app.ddol {
            Some(ddol) => ddol.build(&*self.terminal, self.tags),
            None => rand::thread_rng().gen::<[u8; 4]>().to_vec(),
        };

        let response = commands::internal_authenticate(ddol_data.clone()).send(&mut self.transport)?;
        if !response.is_success() {
            return Err(EmvError::CardProtocol {
                command: "INTERNAL AUTHENTICATE",
                status: response.sw(),
            });
        }

        let sdad = signed_dynamic_data(&response.data)?;
        let outcome = match verify_signed_dynamic_data(&sdad, &icc_key, &ddol_data) {
            Ok(data) => {
                info!(dynamic_number = %hex::encode_upper(&data.icc_dynamic_number), "dynamic data authentication succeeded");
                AuthenticationOutcome::Valid(data)
            }
            Err(failure) => {
                warn!(reason = %failure, "dynamic data authentication failed");
                AuthenticationOutcome::Invalid(failure)
            }
        };
        app.authentication = Some(outcome.clone());

        self.transition(SessionState::Authenticated);
        Ok(outcome)
    }

    /// GET DATA for the counters and read the transaction log
    pub fn read_additional_data(&mut self) -> Result<&Application> {
        let read_log = self.config.read_transaction_log;
        let app = self
            .card
            .as_mut()
            .and_then(Card::selected_application_mut)
            .ok_or(EmvError::InvalidState("no application selected"))?;

        app.atc = get_counter(&mut self.transport, ids::ATC.bytes())?;
        app.last_online_atc = get_counter(&mut self.transport, ids::LAST_ONLINE_ATC.bytes())?;
        app.pin_try_counter = get_counter(&mut self.transport, ids::PIN_TRY_COUNTER.bytes())?;

        let log_entry = app.log_entry;
        if let (true, Some(log)) = (read_log, log_entry) {
            let entries = self.read_record_file(log.sfi, Some(log.record_count))?;
            if let Some(app) = self.card.as_mut().and_then(Card::selected_application_mut) {
                app.transaction_log = entries.into_iter().map(|(_, data)| data).collect();
            }
        }

        self.selected()
    }

    /// VERIFY an offline plaintext PIN
    pub fn verify_pin(&mut self, pin: &str, plaintext: bool) -> Result<PinVerification> {
        if !plaintext {
            return Err(EmvError::Unsupported("enciphered PIN verification"));
        }
        self.selected()?;

        let block = plaintext_pin_block(pin)?;
        let response = self.send(commands::verify_plaintext(block))?;
        let status = response.sw();

        match status {
            StatusWord::SUCCESS => Ok(PinVerification::Verified),
            StatusWord::AUTH_METHOD_BLOCKED => Ok(PinVerification::Blocked),
            _ if status.value() == 0x6984 => Ok(PinVerification::Blocked),
            _ => match status.retries_remaining() {
                Some(tries_remaining) => Ok(PinVerification::WrongPin { tries_remaining }),
                None => Err(EmvError::CardProtocol {
                    command: "VERIFY",
                    status,
                }),
            },
        }
    }

    /// GET CHALLENGE: 8 bytes of card randomness
    pub fn get_challenge(&mut self) -> Result<Vec<u8>> {
        let response = self.send(commands::get_challenge())?;
        if !response.is_success() {
            return Err(EmvError::CardProtocol {
                command: "GET CHALLENGE",
                status: response.sw(),
            });
        }
        Ok(response.data)
    }

    /// End the session and release the card
    pub fn close(&mut self, reset: bool) -> Result<()> {
        self.transport.disconnect(reset)?;
        self.transition(SessionState::Done);
        Ok(())
    }
}

fn process_application<T: CardTransport>(
    transport: &mut T,
    app: &mut Application,
    pdol_data: &[u8],
) -> Result<()> {
    let response = commands::get_processing_options(pdol_data).send(transport)?;
    if !response.is_success() {
        return Err(EmvError::CardProtocol {
            command: "GET PROCESSING OPTIONS",
            status: response.sw(),
        });
    }
    app.apply_gpo_response(&response.data)?;

    for entry in app.afl.clone() {
        for number in entry.records() {
            let response = commands::read_record(number, entry.sfi)?.send(transport)?;
            if !response.is_success() {
                return Err(EmvError::CardProtocol {
                    command: "READ RECORD",
                    status: response.sw(),
                });
            }
            app.add_record(entry.sfi, number, response.data, entry.is_oda_record(number))?;
        }
    }

    debug!(records = app.records.len(), oda_bytes = app.oda_data.len(), "application records read");
    Ok(())
}

/// GET DATA; any status other than 9000 means the object is absent
fn get_data<T: CardTransport>(transport: &mut T, tag: &[u8]) -> Result<Option<u64>> {
    let response = commands::get_data(tag).send(transport)?;
    if !response.is_success() {
        debug!(tag = %hex::encode_upper(tag), status = %response.sw(), "GET DATA not available");
        return Ok(None);
    }
    Ok(counter_value(tag, &response.data))
}

/// GET DATA for a counter; a value too wide for `N` is treated as absent
fn get_counter<T: CardTransport, N: TryFrom<u64>>(transport: &mut T, tag: &[u8]) -> Result<Option<N>> {
    let Some(value) = get_data(transport, tag)? else {
        return Ok(None);
    };
    match N::try_from(value) {
        Ok(counter) => Ok(Some(counter)),
        Err(_) => {
            warn!(tag = %hex::encode_upper(tag), value, "counter out of range, ignored");
            Ok(None)
        }
    }
}

/// Signed dynamic application data from a format 1 or format 2 response
fn signed_dynamic_data(response: &[u8]) -> Result<Vec<u8>> {
    let tlv = TlvReader::new(response)
        .next_tlv()?
        .ok_or_else(|| EmvError::MalformedData("empty INTERNAL AUTHENTICATE response".into()))?;

    match tlv.tag() {
        [0x80] => Ok(tlv.into_value()),
        [0x77] => find_tag(tlv.value(), ids::SIGNED_DYNAMIC_APPLICATION_DATA.bytes())
            .ok_or_else(|| EmvError::MalformedData("no signed dynamic application data".into())),
        other => Err(EmvError::MalformedData(format!(
            "unexpected INTERNAL AUTHENTICATE template {}",
            hex::encode_upper(other)
        ))),
    }
}

/// ISO 9564 format 2 plaintext PIN block
pub fn plaintext_pin_block(pin: &str) -> Result<[u8; 8]> {
    let digits = digits_to_bcd(pin)
        .filter(|_| (4..=12).contains(&pin.len()))
        .ok_or_else(|| EmvError::InvalidInput("PIN must be 4 to 12 digits".into()))?;

    let mut block = [0xFF; 8];
    block[0] = 0x20 | pin.len() as u8;
    block[1..1 + digits.len()].copy_from_slice(&digits);
    Ok(block)
}
