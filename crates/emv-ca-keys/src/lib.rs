//! EMV CA Keys - Certificate Authority public key management
//!
//! This crate holds the certification authority public keys used to recover
//! issuer certificates. A [`CaKeyStore`] is built once before any card
//! session, every key checksum is verified while building it, and the store is
//! read-only afterwards so sessions can share it by reference.
//!
//! Keys can be supplied as typed [`CaRecord`]s or loaded from the
//! tab-separated key file format:
//!
//! ```text
//! # Scheme  Exponent  Index  RID         Modulus  KeyLength  Hash      [Expiry]
//! Visa      03        92     A000000003  B83C...  1408       429C95...  311226
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rsa::{BigUint, RsaPublicKey};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};

/// Length of a Registered Application Provider Identifier
pub const RID_LEN: usize = 5;

/// Hash algorithm indicator for SHA-1
pub const HASH_ALGORITHM_SHA1: u8 = 0x01;

/// Public key algorithm indicator for RSA
pub const PUBLIC_KEY_ALGORITHM_RSA: u8 = 0x01;

pub type Rid = [u8; RID_LEN];

/// Errors raised while building a key store
#[derive(Debug, Error)]
pub enum CaKeyError {
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("RID must be {RID_LEN} bytes, got {0}")]
    InvalidRid(usize),

    #[error("checksum mismatch for CA key {rid} index {index:02X}")]
    ChecksumMismatch { rid: String, index: u8 },

    #[error("duplicate CA key {rid} index {index:02X}")]
    DuplicateKey { rid: String, index: u8 },

    #[error("failed to read CA key file: {0}")]
    Io(#[from] std::io::Error),
}

/// A single CA public key
#[derive(Clone, PartialEq, Eq)]
pub struct CaPublicKey {
    pub index: u8,
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
    pub hash_algorithm: u8,
    pub public_key_algorithm: u8,
    /// Expiration date as written by the key provider (usually DDMMYY)
    pub expiration_date: Option<String>,
    pub sha1_hash: [u8; 20],
}

impl CaPublicKey {
    /// SHA-1 over RID ‖ index ‖ modulus ‖ exponent
    pub fn compute_checksum(rid: &[u8], index: u8, modulus: &[u8], exponent: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(rid);
        hasher.update([index]);
        hasher.update(modulus);
        hasher.update(exponent);
        hasher.finalize().into()
    }

    pub fn verify_checksum(&self, rid: &[u8]) -> bool {
        Self::compute_checksum(rid, self.index, &self.modulus, &self.exponent) == self.sha1_hash
    }

    /// Modulus length in bytes
    pub fn modulus_len(&self) -> usize {
        self.modulus.len()
    }

    pub fn to_rsa_public_key(&self) -> Option<RsaPublicKey> {
        let modulus = BigUint::from_bytes_be(&self.modulus);
        let exponent = BigUint::from_bytes_be(&self.exponent);
        RsaPublicKey::new(modulus, exponent).ok()
    }
}

impl fmt::Debug for CaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaPublicKey")
            .field("index", &format_args!("{:02X}", self.index))
            .field("modulus_bits", &(self.modulus.len() * 8))
            .field("exponent", &format_args!("{}", hex::encode_upper(&self.exponent)))
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

/// Input record for one certification authority
#[derive(Debug, Clone)]
pub struct CaRecord {
    pub rid: Vec<u8>,
    pub name: String,
    pub description: String,
    pub keys: Vec<CaPublicKey>,
}

/// A certification authority and its keys
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    rid: Rid,
    name: String,
    description: String,
    keys: BTreeMap<u8, CaPublicKey>,
}

impl CertificateAuthority {
    pub fn rid(&self) -> &Rid {
        &self.rid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn key(&self, index: u8) -> Option<&CaPublicKey> {
        self.keys.get(&index)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CaPublicKey> {
        self.keys.values()
    }
}

/// Immutable CA key table keyed by RID and key index
#[derive(Debug, Clone, Default)]
pub struct CaKeyStore {
    authorities: BTreeMap<Rid, CertificateAuthority>,
}

impl CaKeyStore {
    /// Store with no keys; every certificate will fail to recover
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from typed records
    ///
    /// Every key checksum must match; a single mismatch rejects the whole
    /// store. Records sharing a RID are merged.
    pub fn from_records(records: impl IntoIterator<Item = CaRecord>) -> Result<Self, CaKeyError> {
        let mut authorities: BTreeMap<Rid, CertificateAuthority> = BTreeMap::new();

        for record in records {
            let rid: Rid = record
                .rid
                .as_slice()
                .try_into()
                .map_err(|_| CaKeyError::InvalidRid(record.rid.len()))?;

            let authority = authorities.entry(rid).or_insert_with(|| CertificateAuthority {
                rid,
                name: record.name.clone(),
                description: record.description.clone(),
                keys: BTreeMap::new(),
            });

            for key in record.keys {
                if !key.verify_checksum(&rid) {
                    warn!(rid = %hex::encode_upper(rid), index = key.index, "CA key checksum mismatch");
                    return Err(CaKeyError::ChecksumMismatch {
                        rid: hex::encode_upper(rid),
                        index: key.index,
                    });
                }
                if authority.keys.contains_key(&key.index) {
                    return Err(CaKeyError::DuplicateKey {
                        rid: hex::encode_upper(rid),
                        index: key.index,
                    });
                }
                authority.keys.insert(key.index, key);
            }
        }

        let store = Self { authorities };
        debug!(authorities = store.authorities.len(), keys = store.len(), "CA key store built");
        Ok(store)
    }

    /// Parse the tab-separated key file format
    pub fn parse(text: &str) -> Result<Self, CaKeyError> {
        let mut records: Vec<CaRecord> = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let line_no = line_no + 1;
            // Skip empty lines and comments
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
            if parts.len() < 7 {
                return Err(CaKeyError::Parse {
                    line: line_no,
                    reason: format!("expected at least 7 tab-separated fields, got {}", parts.len()),
                });
            }

            // Format: Scheme, Exponent, Index, RID, Modulus, KeyLength, Hash, [Expiry]
            let scheme = parts[0];
            let exponent = decode_hex(parts[1], line_no, "exponent")?;
            let index = u8::from_str_radix(parts[2], 16).map_err(|e| CaKeyError::Parse {
                line: line_no,
                reason: format!("invalid key index {:?}: {}", parts[2], e),
            })?;
            let rid = decode_hex(parts[3], line_no, "RID")?;
            let modulus = decode_hex(parts[4], line_no, "modulus")?;
            let sha1_hash: [u8; 20] = decode_hex(parts[6], line_no, "hash")?
                .try_into()
                .map_err(|_| CaKeyError::Parse {
                    line: line_no,
                    reason: "hash must be 20 bytes".to_string(),
                })?;
            let expiration_date = parts.get(7).filter(|s| !s.is_empty()).map(|s| s.to_string());

            let key = CaPublicKey {
                index,
                modulus,
                exponent,
                hash_algorithm: HASH_ALGORITHM_SHA1,
                public_key_algorithm: PUBLIC_KEY_ALGORITHM_RSA,
                expiration_date,
                sha1_hash,
            };

            match records.iter_mut().find(|r| r.rid == rid) {
                Some(record) => record.keys.push(key),
                None => records.push(CaRecord {
                    rid,
                    name: scheme.to_string(),
                    description: String::new(),
                    keys: vec![key],
                }),
            }
        }

        Self::from_records(records)
    }

    /// Load and parse a key file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaKeyError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn authority(&self, rid: &[u8]) -> Option<&CertificateAuthority> {
        let rid: Rid = rid.try_into().ok()?;
        self.authorities.get(&rid)
    }

    pub fn authorities(&self) -> impl Iterator<Item = &CertificateAuthority> {
        self.authorities.values()
    }

    /// Look up a CA key by RID and index
    pub fn get(&self, rid: &[u8], index: u8) -> Option<&CaPublicKey> {
        self.authority(rid)?.key(index)
    }

    /// Get CA (Certificate Authority) public key by RID and index
    pub fn get_ca_public_key(&self, rid: &[u8], ca_index: u8) -> Option<RsaPublicKey> {
        self.get(rid, ca_index)?.to_rsa_public_key()
    }

    /// Total number of keys across all authorities
    pub fn len(&self) -> usize {
        self.authorities.values().map(|ca| ca.keys.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_hex(field: &str, line: usize, what: &str) -> Result<Vec<u8>, CaKeyError> {
    hex::decode(field).map_err(|e| CaKeyError::Parse {
        line,
        reason: format!("invalid {} hex: {}", what, e),
    })
}

/// Common RIDs for major payment schemes
pub mod rids {
    /// Visa RID
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03];

    /// Mastercard RID
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04];

    /// American Express RID
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x25];

    /// Discover RID
    pub const DISCOVER: &[u8] = &[0xA0, 0x00, 0x00, 0x01, 0x52];

    /// JCB RID
    pub const JCB: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x65];

    /// UnionPay RID
    pub const UNIONPAY: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x33];

    /// Interac RID
    pub const INTERAC: &[u8] = &[0xA0, 0x00, 0x00, 0x02, 0x77];
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const MODULUS: [u8; 16] = hex!("C1 D2 E3 F4 05 16 27 38 49 5A 6B 7C 8D 9E AF B1");

    fn key(rid: &[u8], index: u8) -> CaPublicKey {
        CaPublicKey {
            index,
            modulus: MODULUS.to_vec(),
            exponent: vec![0x03],
            hash_algorithm: HASH_ALGORITHM_SHA1,
            public_key_algorithm: PUBLIC_KEY_ALGORITHM_RSA,
            expiration_date: None,
            sha1_hash: CaPublicKey::compute_checksum(rid, index, &MODULUS, &[0x03]),
        }
    }

    fn record(rid: &[u8], keys: Vec<CaPublicKey>) -> CaRecord {
        CaRecord {
            rid: rid.to_vec(),
            name: "Test".into(),
            description: "test scheme".into(),
            keys,
        }
    }

    fn key_line(scheme: &str, rid: &[u8], index: u8, hash: &[u8]) -> String {
        format!(
            "{}\t03\t{:02X}\t{}\t{}\t{}\t{}",
            scheme,
            index,
            hex::encode_upper(rid),
            hex::encode_upper(MODULUS),
            MODULUS.len() * 8,
            hex::encode_upper(hash)
        )
    }

    #[test]
    fn test_lookup_by_rid_and_index() {
        let store = CaKeyStore::from_records(vec![
            record(rids::MASTERCARD, vec![key(rids::MASTERCARD, 0x05), key(rids::MASTERCARD, 0x06)]),
            record(rids::VISA, vec![key(rids::VISA, 0x92)]),
        ])
        .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(rids::MASTERCARD, 0x05).map(|k| k.index), Some(0x05));
        assert!(store.get(rids::MASTERCARD, 0xFF).is_none());
        assert!(store.get(rids::AMEX, 0x05).is_none());
        assert_eq!(store.authority(rids::VISA).map(|ca| ca.name()), Some("Test"));
        assert_eq!(store.authority(rids::MASTERCARD).map(|ca| ca.keys().count()), Some(2));
    }

    #[test]
    fn test_checksum_mismatch_rejects_whole_store() {
        let mut bad = key(rids::VISA, 0x92);
        bad.sha1_hash[0] ^= 0x01;

        let err = CaKeyStore::from_records(vec![
            record(rids::MASTERCARD, vec![key(rids::MASTERCARD, 0x05)]),
            record(rids::VISA, vec![bad]),
        ])
        .unwrap_err();

        assert!(matches!(err, CaKeyError::ChecksumMismatch { index: 0x92, .. }));
    }

    #[test]
    fn test_checksum_binds_rid() {
        // A key hashed for one RID must not verify under another
        let k = key(rids::VISA, 0x92);
        assert!(k.verify_checksum(rids::VISA));
        assert!(!k.verify_checksum(rids::MASTERCARD));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = CaKeyStore::from_records(vec![
            record(rids::VISA, vec![key(rids::VISA, 0x92)]),
            record(rids::VISA, vec![key(rids::VISA, 0x92)]),
        ])
        .unwrap_err();
        assert!(matches!(err, CaKeyError::DuplicateKey { index: 0x92, .. }));
    }

    #[test]
    fn test_invalid_rid_length() {
        let err = CaKeyStore::from_records(vec![record(&[0xA0, 0x00], vec![])]).unwrap_err();
        assert!(matches!(err, CaKeyError::InvalidRid(2)));
    }

    #[test]
    fn test_parse_key_file() {
        let good = CaPublicKey::compute_checksum(rids::MASTERCARD, 0x05, &MODULUS, &[0x03]);
        let text = format!(
            "# Scheme\tExponent\tIndex\tRID\tModulus\tKeyLength\tHash\n\n{}\t311225\n",
            key_line("Mastercard", rids::MASTERCARD, 0x05, &good)
        );

        let store = CaKeyStore::parse(&text).unwrap();
        let k = store.get(rids::MASTERCARD, 0x05).unwrap();
        assert_eq!(k.exponent, vec![0x03]);
        assert_eq!(k.expiration_date.as_deref(), Some("311225"));
        assert_eq!(store.authority(rids::MASTERCARD).unwrap().name(), "Mastercard");
    }

    #[test]
    fn test_parse_rejects_bad_hash() {
        let text = key_line("Visa", rids::VISA, 0x92, &[0u8; 20]);
        assert!(matches!(
            CaKeyStore::parse(&text),
            Err(CaKeyError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_reports_line_number() {
        let text = "# comment\nVisa\t03\tZZ\tA000000003\tC1\t8\t00\n";
        match CaKeyStore::parse(text) {
            Err(CaKeyError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
