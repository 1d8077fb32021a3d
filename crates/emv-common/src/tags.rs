//! EMV tag identifiers and the tag registry
//!
//! The registry is an explicitly constructed, immutable table. Build it once
//! with [`TagRegistry::emv`] and share it by reference with every session.

use std::collections::HashMap;

/// EMV Tag identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmvTag(pub &'static [u8]);

impl EmvTag {
    pub const fn bytes(self) -> &'static [u8] {
        self.0
    }
}

impl AsRef<[u8]> for EmvTag {
    fn as_ref(&self) -> &[u8] {
        self.0
    }
}

/// How the value of a data object is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Alphanumeric / ASCII text (`an`, `ans`)
    Text,
    /// BCD numeric, right-justified and left-padded with zeros (`n`)
    Numeric,
    /// Opaque binary (`b`)
    Binary,
    /// Compressed numeric or other mixed layouts (`cn`, bit fields)
    Mixed,
    /// Data object list: a sequence of (tag, length) pairs
    Dol,
}

/// Static description of a known tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDescriptor {
    pub id: &'static [u8],
    pub value_type: ValueType,
    pub constructed: bool,
    pub name: &'static str,
}

/// Result of looking up a tag id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTag<'r> {
    Known(&'r TagDescriptor),
    /// Tag the registry does not describe; parsing carries on regardless
    Unknown(Vec<u8>),
}

impl ResolvedTag<'_> {
    pub fn id(&self) -> &[u8] {
        match self {
            ResolvedTag::Known(desc) => desc.id,
            ResolvedTag::Unknown(id) => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResolvedTag::Known(desc) => desc.name,
            ResolvedTag::Unknown(_) => "Unhandled Tag",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            ResolvedTag::Known(desc) => desc.value_type,
            ResolvedTag::Unknown(_) => ValueType::Binary,
        }
    }

    /// Unknown ids fall back to the constructed bit of the first tag byte
    pub fn is_constructed(&self) -> bool {
        match self {
            ResolvedTag::Known(desc) => desc.constructed,
            ResolvedTag::Unknown(id) => id.first().is_some_and(|b| b & 0x20 != 0),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ResolvedTag::Known(_))
    }
}

/// Immutable mapping from tag id to descriptor
#[derive(Debug, Clone)]
pub struct TagRegistry {
    tags: HashMap<&'static [u8], TagDescriptor>,
}

impl TagRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = TagDescriptor>) -> Self {
        Self {
            tags: descriptors.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Registry holding the EMV Book 3 / ISO 7816 data dictionary
    pub fn emv() -> Self {
        Self::new(EMV_TAGS.iter().copied())
    }

    pub fn resolve(&self, id: &[u8]) -> ResolvedTag<'_> {
        match self.tags.get(id) {
            Some(desc) => ResolvedTag::Known(desc),
            None => ResolvedTag::Unknown(id.to_vec()),
        }
    }

    /// Get a human-readable name for an EMV tag
    pub fn name(&self, id: &[u8]) -> &str {
        self.tags.get(id).map_or("Unhandled Tag", |d| d.name)
    }

    pub fn value_type(&self, id: &[u8]) -> ValueType {
        self.resolve(id).value_type()
    }

    pub fn is_constructed(&self, id: &[u8]) -> bool {
        self.resolve(id).is_constructed()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::emv()
    }
}

/// Common EMV tags used in payment card processing
pub mod ids {
    use super::EmvTag;

    // Templates
    pub const FCI_TEMPLATE: EmvTag = EmvTag(&[0x6F]);
    pub const FCI_PROPRIETARY_TEMPLATE: EmvTag = EmvTag(&[0xA5]);
    pub const FCI_ISSUER_DISCRETIONARY_DATA: EmvTag = EmvTag(&[0xBF, 0x0C]);
    pub const APPLICATION_TEMPLATE: EmvTag = EmvTag(&[0x61]);
    pub const RECORD_TEMPLATE: EmvTag = EmvTag(&[0x70]);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_1: EmvTag = EmvTag(&[0x80]);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_2: EmvTag = EmvTag(&[0x77]);
    pub const COMMAND_TEMPLATE: EmvTag = EmvTag(&[0x83]);

    // Application metadata
    pub const APPLICATION_IDENTIFIER: EmvTag = EmvTag(&[0x4F]);
    pub const APPLICATION_LABEL: EmvTag = EmvTag(&[0x50]);
    pub const APPLICATION_PAN: EmvTag = EmvTag(&[0x5A]);
    pub const DEDICATED_FILE_NAME: EmvTag = EmvTag(&[0x84]);
    pub const APPLICATION_PRIORITY_INDICATOR: EmvTag = EmvTag(&[0x87]);
    pub const SHORT_FILE_IDENTIFIER: EmvTag = EmvTag(&[0x88]);
    pub const APPLICATION_PREFERRED_NAME: EmvTag = EmvTag(&[0x9F, 0x12]);
    pub const ISSUER_CODE_TABLE_INDEX: EmvTag = EmvTag(&[0x9F, 0x11]);
    pub const LANGUAGE_PREFERENCE: EmvTag = EmvTag(&[0x5F, 0x2D]);
    pub const LOG_ENTRY: EmvTag = EmvTag(&[0x9F, 0x4D]);
    pub const LOG_FORMAT: EmvTag = EmvTag(&[0x9F, 0x4F]);
    pub const APPLICATION_EXPIRATION_DATE: EmvTag = EmvTag(&[0x5F, 0x24]);
    pub const APPLICATION_EFFECTIVE_DATE: EmvTag = EmvTag(&[0x5F, 0x25]);
    pub const APPLICATION_PAN_SEQUENCE_NUMBER: EmvTag = EmvTag(&[0x5F, 0x34]);
    pub const CARDHOLDER_NAME: EmvTag = EmvTag(&[0x5F, 0x20]);
    pub const TRACK_2_EQUIVALENT_DATA: EmvTag = EmvTag(&[0x57]);

    // Processing
    pub const AIP: EmvTag = EmvTag(&[0x82]);
    pub const AFL: EmvTag = EmvTag(&[0x94]);
    pub const PDOL: EmvTag = EmvTag(&[0x9F, 0x38]);
    pub const CDOL1: EmvTag = EmvTag(&[0x8C]);
    pub const CDOL2: EmvTag = EmvTag(&[0x8D]);
    pub const DDOL: EmvTag = EmvTag(&[0x9F, 0x49]);
    pub const UNPREDICTABLE_NUMBER: EmvTag = EmvTag(&[0x9F, 0x37]);
    pub const ATC: EmvTag = EmvTag(&[0x9F, 0x36]);
    pub const LAST_ONLINE_ATC: EmvTag = EmvTag(&[0x9F, 0x13]);
    pub const PIN_TRY_COUNTER: EmvTag = EmvTag(&[0x9F, 0x17]);

    // Cryptography and certificates
    pub const CA_PUBLIC_KEY_INDEX: EmvTag = EmvTag(&[0x8F]);
    pub const ISSUER_PUBLIC_KEY_CERTIFICATE: EmvTag = EmvTag(&[0x90]);
    pub const ISSUER_PUBLIC_KEY_EXPONENT: EmvTag = EmvTag(&[0x9F, 0x32]);
    pub const ISSUER_PUBLIC_KEY_REMAINDER: EmvTag = EmvTag(&[0x92]);
    pub const SIGNED_STATIC_APPLICATION_DATA: EmvTag = EmvTag(&[0x93]);
    pub const ICC_PUBLIC_KEY_CERTIFICATE: EmvTag = EmvTag(&[0x9F, 0x46]);
    pub const ICC_PUBLIC_KEY_EXPONENT: EmvTag = EmvTag(&[0x9F, 0x47]);
    pub const ICC_PUBLIC_KEY_REMAINDER: EmvTag = EmvTag(&[0x9F, 0x48]);
    pub const SIGNED_DYNAMIC_APPLICATION_DATA: EmvTag = EmvTag(&[0x9F, 0x4B]);
    pub const STATIC_DATA_AUTHENTICATION_TAG_LIST: EmvTag = EmvTag(&[0x9F, 0x4A]);
}

const fn tag(
    id: &'static [u8],
    value_type: ValueType,
    constructed: bool,
    name: &'static str,
) -> TagDescriptor {
    TagDescriptor {
        id,
        value_type,
        constructed,
        name,
    }
}

use self::ValueType::{Binary, Dol, Mixed, Numeric, Text};

static EMV_TAGS: &[TagDescriptor] = &[
    tag(&[0x42], Numeric, false, "Issuer Identification Number (IIN)"),
    tag(&[0x4F], Binary, false, "Application Identifier (AID)"),
    tag(&[0x50], Text, false, "Application Label"),
    tag(&[0x56], Text, false, "Track 1 Data"),
    tag(&[0x57], Binary, false, "Track 2 Equivalent Data"),
    tag(&[0x5A], Mixed, false, "Application PAN"),
    tag(&[0x5F, 0x20], Text, false, "Cardholder Name"),
    tag(&[0x5F, 0x24], Numeric, false, "Application Expiration Date"),
    tag(&[0x5F, 0x25], Numeric, false, "Application Effective Date"),
    tag(&[0x5F, 0x28], Numeric, false, "Issuer Country Code"),
    tag(&[0x5F, 0x2A], Numeric, false, "Transaction Currency Code"),
    tag(&[0x5F, 0x2D], Text, false, "Language Preference"),
    tag(&[0x5F, 0x30], Numeric, false, "Service Code"),
    tag(&[0x5F, 0x34], Numeric, false, "Application PAN Sequence Number"),
    tag(&[0x5F, 0x36], Numeric, false, "Transaction Currency Exponent"),
    tag(&[0x5F, 0x50], Text, false, "Issuer URL"),
    tag(&[0x5F, 0x53], Text, false, "International Bank Account Number (IBAN)"),
    tag(&[0x5F, 0x54], Text, false, "Bank Identifier Code (BIC)"),
    tag(&[0x5F, 0x55], Text, false, "Issuer Country Code (alpha2)"),
    tag(&[0x5F, 0x56], Text, false, "Issuer Country Code (alpha3)"),
    tag(&[0x61], Binary, true, "Application Template"),
    tag(&[0x6F], Binary, true, "File Control Information (FCI) Template"),
    tag(&[0x70], Binary, true, "Record Template"),
    tag(&[0x71], Binary, true, "Issuer Script Template 1"),
    tag(&[0x72], Binary, true, "Issuer Script Template 2"),
    tag(&[0x73], Binary, true, "Directory Discretionary Template"),
    tag(&[0x77], Binary, true, "Response Message Template Format 2"),
    tag(&[0x80], Binary, false, "Response Message Template Format 1"),
    tag(&[0x82], Binary, false, "Application Interchange Profile"),
    tag(&[0x83], Binary, false, "Command Template"),
    tag(&[0x84], Binary, false, "Dedicated File (DF) Name"),
    tag(&[0x87], Binary, false, "Application Priority Indicator"),
    tag(&[0x88], Binary, false, "Short File Identifier (SFI)"),
    tag(&[0x8A], Text, false, "Authorisation Response Code"),
    tag(&[0x8C], Dol, false, "Card Risk Management Data Object List 1 (CDOL1)"),
    tag(&[0x8D], Dol, false, "Card Risk Management Data Object List 2 (CDOL2)"),
    tag(&[0x8E], Binary, false, "Cardholder Verification Method (CVM) List"),
    tag(&[0x8F], Binary, false, "Certification Authority Public Key Index"),
    tag(&[0x90], Binary, false, "Issuer Public Key Certificate"),
    tag(&[0x92], Binary, false, "Issuer Public Key Remainder"),
    tag(&[0x93], Binary, false, "Signed Static Application Data"),
    tag(&[0x94], Binary, false, "Application File Locator (AFL)"),
    tag(&[0x95], Binary, false, "Terminal Verification Results"),
    tag(&[0x97], Dol, false, "Transaction Certificate Data Object List (TDOL)"),
    tag(&[0x9A], Numeric, false, "Transaction Date"),
    tag(&[0x9C], Numeric, false, "Transaction Type"),
    tag(&[0x9D], Binary, false, "Directory Definition File (DDF) Name"),
    tag(&[0x9F, 0x02], Numeric, false, "Amount, Authorised (Numeric)"),
    tag(&[0x9F, 0x03], Numeric, false, "Amount, Other (Numeric)"),
    tag(&[0x9F, 0x06], Binary, false, "Application Identifier (AID) - terminal"),
    tag(&[0x9F, 0x07], Binary, false, "Application Usage Control"),
    tag(&[0x9F, 0x08], Binary, false, "Application Version Number (Card)"),
    tag(&[0x9F, 0x09], Binary, false, "Application Version Number (Terminal)"),
    tag(&[0x9F, 0x0D], Binary, false, "Issuer Action Code - Default"),
    tag(&[0x9F, 0x0E], Binary, false, "Issuer Action Code - Denial"),
    tag(&[0x9F, 0x0F], Binary, false, "Issuer Action Code - Online"),
    tag(&[0x9F, 0x10], Binary, false, "Issuer Application Data"),
    tag(&[0x9F, 0x11], Numeric, false, "Issuer Code Table Index"),
    tag(&[0x9F, 0x12], Text, false, "Application Preferred Name"),
    tag(&[0x9F, 0x13], Binary, false, "Last Online Application Transaction Counter (ATC) Register"),
    tag(&[0x9F, 0x14], Binary, false, "Lower Consecutive Offline Limit"),
    tag(&[0x9F, 0x17], Binary, false, "Personal Identification Number (PIN) Try Counter"),
    tag(&[0x9F, 0x1A], Numeric, false, "Terminal Country Code"),
    tag(&[0x9F, 0x1F], Text, false, "Track 1 Discretionary Data"),
    tag(&[0x9F, 0x21], Numeric, false, "Transaction Time"),
    tag(&[0x9F, 0x23], Binary, false, "Upper Consecutive Offline Limit"),
    tag(&[0x9F, 0x26], Binary, false, "Application Cryptogram"),
    tag(&[0x9F, 0x27], Binary, false, "Cryptogram Information Data"),
    tag(&[0x9F, 0x2D], Binary, false, "ICC PIN Encipherment Public Key Certificate"),
    tag(&[0x9F, 0x2E], Binary, false, "ICC PIN Encipherment Public Key Exponent"),
    tag(&[0x9F, 0x2F], Binary, false, "ICC PIN Encipherment Public Key Remainder"),
    tag(&[0x9F, 0x32], Binary, false, "Issuer Public Key Exponent"),
    tag(&[0x9F, 0x33], Binary, false, "Terminal Capabilities"),
    tag(&[0x9F, 0x34], Binary, false, "Cardholder Verification Method (CVM) Results"),
    tag(&[0x9F, 0x35], Numeric, false, "Terminal Type"),
    tag(&[0x9F, 0x36], Binary, false, "Application Transaction Counter (ATC)"),
    tag(&[0x9F, 0x37], Binary, false, "Unpredictable Number"),
    tag(&[0x9F, 0x38], Dol, false, "Processing Options Data Object List (PDOL)"),
    tag(&[0x9F, 0x40], Binary, false, "Additional Terminal Capabilities"),
    tag(&[0x9F, 0x42], Numeric, false, "Application Currency Code"),
    tag(&[0x9F, 0x44], Numeric, false, "Application Currency Exponent"),
    tag(&[0x9F, 0x45], Binary, false, "Data Authentication Code"),
    tag(&[0x9F, 0x46], Binary, false, "ICC Public Key Certificate"),
    tag(&[0x9F, 0x47], Binary, false, "ICC Public Key Exponent"),
    tag(&[0x9F, 0x48], Binary, false, "ICC Public Key Remainder"),
    tag(&[0x9F, 0x49], Dol, false, "Dynamic Data Authentication Data Object List (DDOL)"),
    tag(&[0x9F, 0x4A], Binary, false, "Static Data Authentication Tag List"),
    tag(&[0x9F, 0x4B], Binary, false, "Signed Dynamic Application Data"),
    tag(&[0x9F, 0x4C], Binary, false, "ICC Dynamic Number"),
    tag(&[0x9F, 0x4D], Binary, false, "Log Entry"),
    tag(&[0x9F, 0x4E], Text, false, "Merchant Name and Location"),
    tag(&[0x9F, 0x4F], Dol, false, "Log Format"),
    tag(&[0x9F, 0x66], Binary, false, "Terminal Transaction Qualifiers (TTQ)"),
    tag(&[0x9F, 0x6B], Binary, false, "Track 2 Data"),
    tag(&[0x9F, 0x6E], Binary, false, "Form Factor Indicator"),
    tag(&[0xA5], Binary, true, "File Control Information (FCI) Proprietary Template"),
    tag(&[0xBF, 0x0C], Binary, true, "File Control Information (FCI) Issuer Discretionary Data"),
];
