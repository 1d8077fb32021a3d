//! EMV application model
//!
//! An [`Application`] accumulates everything read for one AID during a
//! session: FCI fields, processing options, records, the offline data
//! authentication input, and the certificates found along the way.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use emv_ca_keys::CaKeyStore;
use emv_common::tags::ids;
use emv_common::util::{be_uint, bcd_to_digits};
use emv_common::{TagRegistry, TlvReader, ValueType};
use tracing::{debug, warn};

use crate::crypto::{
    AuthenticationMethod, AuthenticationOutcome, CertificateFailure, CertificateState,
    CertificateVerificationResult, IccPublicKeyCertificate, IssuerPublicKeyCertificate,
    RecoveredPublicKey, SignedStaticData,
};
use crate::error::{EmvError, Result};
use crate::terminal::TerminalDataProvider;

/// Application Interchange Profile (tag 82)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aip(pub [u8; 2]);

impl Aip {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Aip(bytes.get(..2)?.try_into().ok()?))
    }

    pub fn supports_sda(&self) -> bool {
        self.0[0] & 0x40 != 0
    }

    pub fn supports_dda(&self) -> bool {
        self.0[0] & 0x20 != 0
    }

    pub fn supports_cardholder_verification(&self) -> bool {
        self.0[0] & 0x10 != 0
    }

    pub fn requires_terminal_risk_management(&self) -> bool {
        self.0[0] & 0x08 != 0
    }

    pub fn supports_issuer_authentication(&self) -> bool {
        self.0[0] & 0x04 != 0
    }

    pub fn supports_cda(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn auth_method(&self) -> AuthenticationMethod {
        AuthenticationMethod::from_aip(&self.0)
    }
}

/// One entry of the Application File Locator (tag 94)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AflEntry {
    pub sfi: u8,
    pub first_record: u8,
    pub last_record: u8,
    /// Number of records, from `first_record`, used for offline data authentication
    pub oda_records: u8,
}

impl AflEntry {
    pub fn records(&self) -> RangeInclusive<u8> {
        self.first_record..=self.last_record
    }

    /// Records taking part in offline data authentication
    pub fn oda_range(&self) -> RangeInclusive<u8> {
        self.first_record..=self.first_record.saturating_add(self.oda_records).saturating_sub(1)
    }

    pub fn is_oda_record(&self, record: u8) -> bool {
        self.oda_records > 0 && self.oda_range().contains(&record)
    }
}

/// Parse an AFL: groups of SFI<<3, first record, last record, ODA count
pub fn parse_afl(data: &[u8]) -> Result<Vec<AflEntry>> {
    if data.len() % 4 != 0 {
        return Err(EmvError::MalformedData(format!(
            "AFL length {} is not a multiple of 4",
            data.len()
        )));
    }

    data.chunks_exact(4)
        .map(|chunk| {
            let entry = AflEntry {
                sfi: chunk[0] >> 3,
                first_record: chunk[1],
                last_record: chunk[2],
                oda_records: chunk[3],
            };
            if entry.sfi == 0 || entry.first_record == 0 || entry.last_record < entry.first_record {
                return Err(EmvError::MalformedData(format!("invalid AFL entry {}", hex::encode_upper(chunk))));
            }
            Ok(entry)
        })
        .collect()
}

/// Read one tag id from a tag list or DOL
fn read_tag<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let start = *pos;
    let first = *data.get(*pos)?;
    *pos += 1;
    if first & 0x1F == 0x1F {
        loop {
            let b = *data.get(*pos)?;
            *pos += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    Some(&data[start..*pos])
}

/// Split a tag list (such as 9F4A) into tag ids
pub fn parse_tag_list(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut pos = 0;
    let mut tags = Vec::new();
    while pos < data.len() {
        let tag = read_tag(data, &mut pos)
            .ok_or_else(|| EmvError::MalformedData("truncated tag list".into()))?;
        tags.push(tag.to_vec());
    }
    Ok(tags)
}

/// A (tag, length) pair requested by a data object list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DolEntry {
    pub tag: Vec<u8>,
    pub length: usize,
}

/// Data Object List (PDOL, DDOL, CDOL1, CDOL2)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dol {
    entries: Vec<DolEntry>,
}

impl Dol {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let mut entries = Vec::new();
        while pos < data.len() {
            let tag = read_tag(data, &mut pos)
                .ok_or_else(|| EmvError::MalformedData("truncated DOL tag".into()))?;
            let length = *data
                .get(pos)
                .ok_or_else(|| EmvError::MalformedData("DOL entry without length".into()))?;
            pos += 1;
            entries.push(DolEntry {
                tag: tag.to_vec(),
                length: length as usize,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DolEntry] {
        &self.entries
    }

    /// Total length of the data this list asks for
    pub fn data_len(&self) -> usize {
        self.entries.iter().map(|e| e.length).sum()
    }

    /// Concatenate the terminal's values for every entry
    ///
    /// Unresolved tags are zero-filled. Numeric values are padded and
    /// truncated on the left, everything else on the right.
    pub fn build(&self, provider: &dyn TerminalDataProvider, registry: &TagRegistry) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data_len());
        for entry in &self.entries {
            match provider.resolve(&entry.tag, entry.length) {
                Some(value) => {
                    let numeric = registry.value_type(&entry.tag) == ValueType::Numeric;
                    out.extend(fit_value(value, entry.length, numeric));
                }
                None => {
                    debug!(tag = %hex::encode_upper(&entry.tag), "no terminal data, zero-filling");
                    out.extend(std::iter::repeat(0).take(entry.length));
                }
            }
        }
        out
    }
}

fn fit_value(mut value: Vec<u8>, length: usize, numeric: bool) -> Vec<u8> {
    if numeric {
        if value.len() > length {
            value.drain(..value.len() - length);
        }
        let mut out = vec![0u8; length - value.len()];
        out.extend(value);
        out
    } else {
        value.resize(length, 0);
        value
    }
}

/// Log Entry (tag 9F4D): where the transaction log lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    pub sfi: u8,
    pub record_count: u8,
}

/// A record as returned by READ RECORD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sfi: u8,
    pub number: u8,
    pub data: Vec<u8>,
}

/// One card application and everything read for it
#[derive(Debug, Clone, Default)]
pub struct Application {
    pub aid: Vec<u8>,
    pub label: Option<String>,
    pub preferred_name: Option<String>,
    /// Application priority, 1 is highest; `None` when unprioritized
    pub priority: Option<u8>,
    pub language_preference: Option<String>,
    pub issuer_code_table_index: Option<u8>,
    pub pdol: Option<Dol>,
    pub ddol: Option<Dol>,
    pub cdol1: Option<Dol>,
    pub cdol2: Option<Dol>,
    pub aip: Option<Aip>,
    pub afl: Vec<AflEntry>,
    pub log_entry: Option<LogEntry>,
    /// Raw FCI returned by SELECT
    pub fci: Option<Vec<u8>>,
    pub records: Vec<Record>,
    /// Every primitive data object seen, by tag
    pub tags: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Concatenated offline data authentication records
    pub oda_data: Vec<u8>,
    pub issuer_certificate: Option<IssuerPublicKeyCertificate>,
    pub icc_certificate: Option<IccPublicKeyCertificate>,
    pub signed_static_data: Option<SignedStaticData>,
    pub atc: Option<u16>,
    pub last_online_atc: Option<u16>,
    pub pin_try_counter: Option<u8>,
    pub transaction_log: Vec<Vec<u8>>,
    pub authentication: Option<AuthenticationOutcome>,
    /// Why processing stopped, when it did
    pub processing_failure: Option<String>,
}

impl Application {
    pub fn new(aid: &[u8]) -> Self {
        Self {
            aid: aid.to_vec(),
            ..Self::default()
        }
    }

    /// Build an application from a SELECT response
    pub fn from_fci(fci: &[u8]) -> Result<Self> {
        let mut app = Self::default();
        app.apply_fci(fci)?;
        if app.aid.is_empty() {
            return Err(EmvError::MalformedData("FCI carries no DF name".into()));
        }
        Ok(app)
    }

    /// Merge the fields of a File Control Information template (tag 6F)
    pub fn apply_fci(&mut self, fci: &[u8]) -> Result<()> {
        let template = TlvReader::new(fci)
            .next_tlv()?
            .filter(|tlv| tlv.tag() == ids::FCI_TEMPLATE.bytes())
            .ok_or_else(|| EmvError::MalformedData("response is not an FCI template".into()))?;

        self.ingest(template.value())?;
        self.fci = Some(fci.to_vec());
        Ok(())
    }

    /// Record every primitive data object in `data`, descending into templates
    pub fn ingest(&mut self, data: &[u8]) -> Result<()> {
        for tlv in TlvReader::new(data) {
            let tlv = tlv?;
            if tlv.is_constructed() {
                self.ingest(tlv.value())?;
            } else {
                self.apply_primitive(tlv.tag(), tlv.value())?;
            }
        }
        Ok(())
    }

    fn apply_primitive(&mut self, tag: &[u8], value: &[u8]) -> Result<()> {
        match tag {
            [0x4F] | [0x84] => {
                if self.aid.is_empty() {
                    self.aid = value.to_vec();
                }
            }
            [0x50] => self.label = Some(text(value)),
            [0x9F, 0x12] => self.preferred_name = Some(text(value)),
            [0x87] => {
                self.priority = value.first().map(|p| p & 0x0F).filter(|&p| p != 0);
            }
            [0x5F, 0x2D] => self.language_preference = Some(text(value)),
            [0x9F, 0x11] => self.issuer_code_table_index = value.first().copied(),
            [0x9F, 0x38] => self.pdol = Some(Dol::parse(value)?),
            [0x9F, 0x49] => self.ddol = Some(Dol::parse(value)?),
            [0x8C] => self.cdol1 = Some(Dol::parse(value)?),
            [0x8D] => self.cdol2 = Some(Dol::parse(value)?),
            [0x82] => self.aip = Aip::from_bytes(value),
            [0x94] => self.afl = parse_afl(value)?,
            [0x9F, 0x4D] => {
                if let [sfi, record_count] = *value {
                    self.log_entry = Some(LogEntry { sfi, record_count });
                }
            }
            [0x8F] => self.issuer_cert_mut().ca_index = value.first().copied(),
            [0x90] => self.issuer_cert_mut().signed = Some(value.to_vec()),
            [0x92] => self.issuer_cert_mut().remainder = value.to_vec(),
            [0x9F, 0x32] => self.issuer_cert_mut().exponent = Some(value.to_vec()),
            [0x9F, 0x46] => self.icc_cert_mut().signed = Some(value.to_vec()),
            [0x9F, 0x48] => self.icc_cert_mut().remainder = value.to_vec(),
            [0x9F, 0x47] => self.icc_cert_mut().exponent = Some(value.to_vec()),
            [0x93] => self.signed_static_data = Some(SignedStaticData::new(value.to_vec())),
            _ => {}
        }
        self.tags.insert(tag.to_vec(), value.to_vec());
        Ok(())
    }

    fn issuer_cert_mut(&mut self) -> &mut IssuerPublicKeyCertificate {
        self.issuer_certificate.get_or_insert_with(Default::default)
    }

    fn icc_cert_mut(&mut self) -> &mut IccPublicKeyCertificate {
        self.icc_certificate.get_or_insert_with(Default::default)
    }

    /// Take AIP and AFL from a GET PROCESSING OPTIONS response
    ///
    /// Format 1 (tag 80) is AIP ‖ AFL; format 2 (tag 77) is a template.
    pub fn apply_gpo_response(&mut self, data: &[u8]) -> Result<()> {
        let tlv = TlvReader::new(data)
            .next_tlv()?
            .ok_or_else(|| EmvError::MalformedData("empty GET PROCESSING OPTIONS response".into()))?;

        match tlv.tag() {
            [0x80] => {
                let value = tlv.value();
                if value.len() < 2 {
                    return Err(EmvError::MalformedData("format 1 response shorter than AIP".into()));
                }
                self.apply_primitive(&[0x82], &value[..2])?;
                self.apply_primitive(&[0x94], &value[2..])?;
            }
            [0x77] => self.ingest(tlv.value())?,
            other => {
                return Err(EmvError::MalformedData(format!(
                    "unexpected GET PROCESSING OPTIONS template {}",
                    hex::encode_upper(other)
                )))
            }
        }

        if self.aip.is_none() {
            return Err(EmvError::MalformedData("no AIP in GET PROCESSING OPTIONS response".into()));
        }
        Ok(())
    }

    /// Store a record read through the AFL
    ///
    /// ODA records from SFI 1 to 10 contribute the value of their `70`
    /// template; records from SFI 11 to 30 contribute their raw bytes.
    pub fn add_record(&mut self, sfi: u8, number: u8, data: Vec<u8>, oda: bool) -> Result<()> {
        self.ingest(&data)?;

        if oda {
            if (1..=10).contains(&sfi) {
                match TlvReader::new(&data).next_tlv()? {
                    Some(tlv) if tlv.tag() == ids::RECORD_TEMPLATE.bytes() => {
                        self.oda_data.extend_from_slice(tlv.value())
                    }
                    _ => {
                        return Err(EmvError::MalformedData(format!(
                            "ODA record {} in SFI {} is not a record template",
                            number, sfi
                        )))
                    }
                }
            } else {
                self.oda_data.extend_from_slice(&data);
            }
        }

        self.records.push(Record { sfi, number, data });
        Ok(())
    }

    pub fn get(&self, tag: &[u8]) -> Option<&[u8]> {
        self.tags.get(tag).map(Vec::as_slice)
    }

    /// Registered application provider identifier
    pub fn rid(&self) -> &[u8] {
        &self.aid[..self.aid.len().min(5)]
    }

    /// Application PAN as digits
    pub fn pan(&self) -> Option<String> {
        self.get(ids::APPLICATION_PAN.bytes()).map(bcd_to_digits)
    }

    pub fn name(&self) -> String {
        self.preferred_name
            .clone()
            .or_else(|| self.label.clone())
            .unwrap_or_else(|| hex::encode_upper(&self.aid))
    }

    pub fn is_failed(&self) -> bool {
        self.processing_failure.is_some()
    }

    /// ODA records followed by the objects named in the SDA tag list
    ///
    /// Only the AIP may be listed in 9F4A; other tags are ignored.
    pub fn static_data_to_authenticate(&self) -> Vec<u8> {
        let mut data = self.oda_data.clone();
        let Some(list) = self.get(ids::STATIC_DATA_AUTHENTICATION_TAG_LIST.bytes()) else {
            return data;
        };

        match parse_tag_list(list) {
            Ok(tags) => {
                for tag in tags {
                    match (tag.as_slice(), self.aip) {
                        ([0x82], Some(aip)) => data.extend_from_slice(&aip.0),
                        _ => warn!(tag = %hex::encode_upper(&tag), "ignoring tag in SDA tag list"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "unreadable SDA tag list"),
        }
        data
    }

    /// Validate the issuer certificate, then the ICC certificate
    ///
    /// Each certificate validates at most once. Missing certificates are left
    /// as `None`.
    pub fn validate_certificates(&mut self, ca_keys: &CaKeyStore) {
        let rid = self.rid().to_vec();
        let pan = self.pan();
        let static_data = self.static_data_to_authenticate();

        let missing_issuer: CertificateState<RecoveredPublicKey> =
            CertificateState::Invalid(CertificateFailure::MissingData("issuer public key certificate (90)"));

        let Application {
            issuer_certificate,
            icc_certificate,
            signed_static_data,
            ..
        } = self;

        if let Some(issuer) = issuer_certificate.as_mut() {
            issuer.validate(ca_keys, &rid, pan.as_deref());
        }
        let issuer_state = issuer_certificate.as_ref().map_or(&missing_issuer, |c| c.state());

        if let Some(icc) = icc_certificate.as_mut() {
            icc.validate(issuer_state, pan.as_deref(), &static_data);
        }
        if let Some(ssad) = signed_static_data.as_mut() {
            ssad.validate(issuer_state, &static_data);
        }
    }

    /// Validate what the card offers and summarise it
    pub fn verify_certificates(&mut self, ca_keys: &CaKeyStore) -> CertificateVerificationResult {
        let method = self.aip.map_or(AuthenticationMethod::None, |aip| aip.auth_method());
        let mut result = CertificateVerificationResult::new(method);

        if method == AuthenticationMethod::None {
            result.errors.push("No authentication method detected in AIP".to_string());
            return result;
        }

        self.validate_certificates(ca_keys);

        let Some(issuer) = self.issuer_certificate.as_ref() else {
            result.errors.push("Issuer certificate not found in card data".to_string());
            return result;
        };

        result.ca_key_found = issuer
            .ca_index()
            .and_then(|index| ca_keys.get(self.rid(), index))
            .is_some();

        match issuer.state() {
            CertificateState::Valid(_) => result.issuer_cert_valid = true,
            CertificateState::Invalid(f) => result.errors.push(format!("Issuer certificate: {}", f)),
            CertificateState::Unvalidated => {}
        }

        match self.signed_static_data.as_ref().map(|s| s.state()) {
            Some(CertificateState::Valid(_)) => result.static_data_valid = true,
            Some(CertificateState::Invalid(f)) => {
                result.errors.push(format!("Signed static data: {}", f))
            }
            _ if method == AuthenticationMethod::Sda => {
                result.errors.push("Signed static application data (93) not found".to_string())
            }
            _ => {}
        }

        if matches!(method, AuthenticationMethod::Dda | AuthenticationMethod::Cda) {
            match self.icc_certificate.as_ref().map(|c| c.state()) {
                Some(CertificateState::Valid(_)) => result.icc_cert_valid = true,
                Some(CertificateState::Invalid(f)) => {
                    result.errors.push(format!("ICC certificate: {}", f))
                }
                _ => result.errors.push("ICC certificate not found in card data".to_string()),
            }
        }

        result.chain_valid = match method {
            AuthenticationMethod::Sda => result.issuer_cert_valid && result.static_data_valid,
            _ => result.issuer_cert_valid && result.icc_cert_valid,
        };
        result
    }
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).trim_end().to_string()
}

/// Parse application templates (tag 61) out of `data`
pub fn parse_application_templates(data: &[u8]) -> Result<Vec<Application>> {
    let mut apps = Vec::new();
    for tlv in TlvReader::new(data) {
        let tlv = tlv?;
        if tlv.tag() != ids::APPLICATION_TEMPLATE.bytes() {
            continue;
        }
        let mut app = Application::default();
        app.ingest(tlv.value())?;
        if app.aid.is_empty() {
            return Err(EmvError::MalformedData("application template without AID".into()));
        }
        apps.push(app);
    }
    Ok(apps)
}

/// Parse one payment system directory record (tag 70 holding 61 templates)
pub fn parse_directory_record(record: &[u8]) -> Result<Vec<Application>> {
    let mut apps = Vec::new();
    for tlv in TlvReader::new(record) {
        let tlv = tlv?;
        if tlv.tag() == ids::RECORD_TEMPLATE.bytes() {
            apps.extend(parse_application_templates(tlv.value())?);
        }
    }
    Ok(apps)
}

/// Decode a GET DATA response for a two byte counter
pub(crate) fn counter_value(tag: &[u8], response: &[u8]) -> Option<u64> {
    let value = emv_common::find_tag(response, tag).unwrap_or_else(|| response.to_vec());
    (!value.is_empty() && value.len() <= 8).then(|| be_uint(&value))
}
