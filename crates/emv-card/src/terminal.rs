//! Terminal resident data and the known application list

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EmvError, Result};

/// Supplies terminal data requested by a card's data object lists
pub trait TerminalDataProvider {
    /// Value for `tag`, ideally `length` bytes long
    ///
    /// `None` means the terminal has no such data; the caller zero-fills.
    fn resolve(&self, tag: &[u8], length: usize) -> Option<Vec<u8>>;
}

/// Terminal resident data, as hex strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Terminal Country Code (9F1A)
    pub country_code: String,
    /// Transaction Currency Code (5F2A)
    pub currency_code: String,
    /// Amount, Authorised (9F02)
    pub amount_authorised: String,
    /// Terminal Type (9F35)
    pub terminal_type: String,
    /// Terminal Capabilities (9F33)
    pub terminal_capabilities: String,
    /// Terminal Transaction Qualifiers (9F66)
    pub transaction_qualifiers: String,
    /// Transaction Type (9C)
    pub transaction_type: String,
    /// Transaction Date (9A) as YYMMDD; today when unset
    pub transaction_date: Option<String>,
    /// Extra or replacement values keyed by tag hex
    pub overrides: BTreeMap<String, String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            country_code: "0840".into(),
            currency_code: "0840".into(),
            amount_authorised: "000000000000".into(),
            terminal_type: "22".into(),
            terminal_capabilities: "E0F8C8".into(),
            transaction_qualifiers: "36000000".into(),
            transaction_type: "00".into(),
            transaction_date: None,
            overrides: BTreeMap::new(),
        }
    }
}

/// [`TerminalDataProvider`] backed by a [`TerminalConfig`]
///
/// The unpredictable number (9F37) is fresh random bytes on every request.
#[derive(Debug, Clone)]
pub struct DefaultTerminalData {
    values: HashMap<Vec<u8>, Vec<u8>>,
}

impl DefaultTerminalData {
    pub fn new(config: &TerminalConfig) -> Result<Self> {
        let date = match &config.transaction_date {
            Some(date) => date.clone(),
            None => Utc::now().format("%y%m%d").to_string(),
        };

        let fixed: [(&[u8], &str); 9] = [
            (&[0x9F, 0x1A], config.country_code.as_str()),
            (&[0x5F, 0x2A], config.currency_code.as_str()),
            (&[0x9F, 0x02], config.amount_authorised.as_str()),
            (&[0x9F, 0x35], config.terminal_type.as_str()),
            (&[0x9F, 0x33], config.terminal_capabilities.as_str()),
            (&[0x9F, 0x66], config.transaction_qualifiers.as_str()),
            (&[0x9C], config.transaction_type.as_str()),
            (&[0x9A], date.as_str()),
            (&[0x95], "0000000000"),
        ];

        let mut values = HashMap::new();
        for (tag, value) in fixed {
            values.insert(tag.to_vec(), decode_hex(value)?);
        }
        for (tag, value) in &config.overrides {
            values.insert(decode_hex(tag)?, decode_hex(value)?);
        }

        Ok(Self { values })
    }
}

impl Default for DefaultTerminalData {
    fn default() -> Self {
        let mut values = HashMap::new();
        values.insert(vec![0x9F, 0x1A], vec![0x08, 0x40]);
        values.insert(vec![0x5F, 0x2A], vec![0x08, 0x40]);
        values.insert(vec![0x9F, 0x35], vec![0x22]);
        Self { values }
    }
}

impl TerminalDataProvider for DefaultTerminalData {
    fn resolve(&self, tag: &[u8], length: usize) -> Option<Vec<u8>> {
        if tag == [0x9F, 0x37] {
            let mut rng = rand::thread_rng();
            return Some((0..length).map(|_| rng.gen()).collect());
        }
        self.values.get(tag).cloned()
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| EmvError::InvalidInput(format!("bad hex {:?}: {}", value, e)))
}

/// A candidate application the terminal supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownAid {
    #[serde(with = "hex_bytes")]
    pub aid: Vec<u8>,
    pub name: String,
    /// Whether SELECT next occurrence should be used for this AID
    pub partial_match: bool,
}

impl KnownAid {
    pub fn new(aid: &[u8], name: &str, partial_match: bool) -> Self {
        Self {
            aid: aid.to_vec(),
            name: name.to_string(),
            partial_match,
        }
    }
}

/// Default list for the fallback candidate search
pub fn default_known_aids() -> Vec<KnownAid> {
    vec![
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10], "Visa Credit/Debit", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x10], "Visa Electron", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x20], "V PAY", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10], "Mastercard", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x04, 0x30, 0x60], "Maestro", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x25], "American Express", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x01, 0x52, 0x30, 0x10], "Discover", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x00, 0x65, 0x10, 0x10], "JCB", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x03, 0x33, 0x01, 0x01, 0x01], "UnionPay Debit", true),
        KnownAid::new(&[0xA0, 0x00, 0x00, 0x02, 0x77, 0x10, 0x10], "Interac", false),
    ]
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
