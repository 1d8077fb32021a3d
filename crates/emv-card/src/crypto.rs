//! Cryptographic operations for EMV offline data authentication
//!
//! A CA key recovers the issuer public key certificate, the issuer key
//! recovers the ICC public key certificate and the signed static data, and the
//! ICC key recovers the signed dynamic data returned by INTERNAL AUTHENTICATE.
//!
//! Recovery is `signed^e mod n`. A certificate that fails any structural or
//! hash check is not an error: it moves to [`CertificateState::Invalid`] with
//! the reason, and stays there.

use emv_ca_keys::{CaKeyStore, HASH_ALGORITHM_SHA1, PUBLIC_KEY_ALGORITHM_RSA};
use emv_common::util::bcd_to_digits;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};

const HEADER: u8 = 0x6A;
const TRAILER: u8 = 0xBC;
const PADDING: u8 = 0xBB;
const HASH_LEN: usize = 20;

const FORMAT_ISSUER_CERTIFICATE: u8 = 0x02;
const FORMAT_SIGNED_STATIC_DATA: u8 = 0x03;
const FORMAT_ICC_CERTIFICATE: u8 = 0x04;
const FORMAT_SIGNED_DYNAMIC_DATA: u8 = 0x05;

/// Why a certificate or signature did not validate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateFailure {
    #[error("{0} not present on card")]
    MissingData(&'static str),

    #[error("no CA public key for RID {rid} index {index:02X}")]
    CaKeyNotFound { rid: String, index: u8 },

    #[error("issuer public key is not available")]
    IssuerKeyUnavailable,

    #[error("ICC public key is not available")]
    IccKeyUnavailable,

    #[error("signed data is {signed} bytes but the key modulus is {modulus} bytes")]
    LengthMismatch { signed: usize, modulus: usize },

    #[error("recovered data of {0} bytes is too short")]
    Truncated(usize),

    #[error("recovered header {0:02X}, expected 6A")]
    Header(u8),

    #[error("recovered format {found:02X}, expected {expected:02X}")]
    Format { expected: u8, found: u8 },

    #[error("unsupported algorithms: hash {hash:02X}, public key {public_key:02X}")]
    UnsupportedAlgorithm { hash: u8, public_key: u8 },

    #[error("declared modulus length {declared} but {available} bytes available")]
    ModulusLength { declared: usize, available: usize },

    #[error("modulus padding byte {0:02X}, expected BB")]
    Padding(u8),

    #[error("declared exponent length {declared} but exponent is {actual} bytes")]
    ExponentLength { declared: usize, actual: usize },

    #[error("recovered trailer {0:02X}, expected BC")]
    Trailer(u8),

    #[error("hash result does not match")]
    HashMismatch,

    #[error("issuer identifier {identifier} does not match PAN {pan}")]
    IssuerIdentifierMismatch { identifier: String, pan: String },

    #[error("certificate PAN {certificate} does not match application PAN {pan}")]
    PanMismatch { certificate: String, pan: String },

    #[error("recovered key is not a usable RSA public key")]
    InvalidKey,
}

/// Memoized validation state
///
/// Starts `Unvalidated` and moves exactly once to `Valid` or `Invalid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateState<T> {
    Unvalidated,
    Valid(T),
    Invalid(CertificateFailure),
}

impl<T> CertificateState<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, CertificateState::Valid(_))
    }

    pub fn is_unvalidated(&self) -> bool {
        matches!(self, CertificateState::Unvalidated)
    }

    pub fn valid(&self) -> Option<&T> {
        match self {
            CertificateState::Valid(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&CertificateFailure> {
        match self {
            CertificateState::Invalid(f) => Some(f),
            _ => None,
        }
    }

    fn settle(&mut self, outcome: Result<T, CertificateFailure>, what: &str) {
        *self = match outcome {
            Ok(v) => {
                debug!("{} valid", what);
                CertificateState::Valid(v)
            }
            Err(failure) => {
                warn!(reason = %failure, "{} invalid", what);
                CertificateState::Invalid(failure)
            }
        };
    }
}

/// Fields recovered from an issuer or ICC public key certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPublicKey {
    /// Issuer identifier or PAN, 'F' padding stripped
    pub identifier: String,
    /// Certificate expiration date, MMYY
    pub expiry: String,
    pub serial: Vec<u8>,
    pub hash_algorithm: u8,
    pub public_key_algorithm: u8,
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

impl RecoveredPublicKey {
    pub fn public_key(&self) -> Result<RsaPublicKey, CertificateFailure> {
        RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.exponent),
        )
        .map_err(|_| CertificateFailure::InvalidKey)
    }
}

/// Recover signed data with an RSA public key
///
/// The signed data must be exactly as long as the modulus. The result is
/// left-padded with zeros to the modulus length.
pub fn rsa_recover(signed: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>, CertificateFailure> {
    let k = key.size();
    if signed.len() != k {
        return Err(CertificateFailure::LengthMismatch {
            signed: signed.len(),
            modulus: k,
        });
    }

    let recovered = BigUint::from_bytes_be(signed)
        .modpow(key.e(), key.n())
        .to_bytes_be();

    let mut out = vec![0u8; k.saturating_sub(recovered.len())];
    out.extend_from_slice(&recovered);
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyCertificateLayout {
    format: u8,
    identifier_len: usize,
}

pub(crate) const ISSUER_LAYOUT: KeyCertificateLayout = KeyCertificateLayout {
    format: FORMAT_ISSUER_CERTIFICATE,
    identifier_len: 4,
};

pub(crate) const ICC_LAYOUT: KeyCertificateLayout = KeyCertificateLayout {
    format: FORMAT_ICC_CERTIFICATE,
    identifier_len: 10,
};

impl KeyCertificateLayout {
    // header, format, identifier, expiry(2), serial(3), algorithms(2), lengths(2)
    fn fixed_len(&self) -> usize {
        2 + self.identifier_len + 2 + 3 + 2 + 2
    }
}

/// Check and split a recovered public key certificate
///
/// `extra` is appended to the hash input (static data to authenticate for
/// ICC certificates, empty for issuer certificates).
pub(crate) fn parse_recovered(
    recovered: &[u8],
    layout: KeyCertificateLayout,
    remainder: &[u8],
    exponent: &[u8],
    extra: &[u8],
) -> Result<RecoveredPublicKey, CertificateFailure> {
    let k = recovered.len();
    let fixed = layout.fixed_len();
    if k < fixed + HASH_LEN + 1 {
        return Err(CertificateFailure::Truncated(k));
    }

    if recovered[0] != HEADER {
        return Err(CertificateFailure::Header(recovered[0]));
    }
    if recovered[1] != layout.format {
        return Err(CertificateFailure::Format {
            expected: layout.format,
            found: recovered[1],
        });
    }

    let mut pos = 2;
    let identifier = bcd_to_digits(&recovered[pos..pos + layout.identifier_len]);
    pos += layout.identifier_len;
    let expiry = hex::encode_upper(&recovered[pos..pos + 2]);
    pos += 2;
    let serial = recovered[pos..pos + 3].to_vec();
    pos += 3;

    let hash_algorithm = recovered[pos];
    let public_key_algorithm = recovered[pos + 1];
    if hash_algorithm != HASH_ALGORITHM_SHA1 || public_key_algorithm != PUBLIC_KEY_ALGORITHM_RSA {
        return Err(CertificateFailure::UnsupportedAlgorithm {
            hash: hash_algorithm,
            public_key: public_key_algorithm,
        });
    }

    let modulus_len = recovered[pos + 2] as usize;
    let exponent_len = recovered[pos + 3] as usize;

    let hash_start = k - HASH_LEN - 1;
    let segment = &recovered[fixed..hash_start];
    let modulus = if modulus_len <= segment.len() {
        let (modulus, padding) = segment.split_at(modulus_len);
        if let Some(&byte) = padding.iter().find(|&&b| b != PADDING) {
            return Err(CertificateFailure::Padding(byte));
        }
        modulus.to_vec()
    } else {
        if segment.len() + remainder.len() != modulus_len {
            return Err(CertificateFailure::ModulusLength {
                declared: modulus_len,
                available: segment.len() + remainder.len(),
            });
        }
        [segment, remainder].concat()
    };

    if recovered[k - 1] != TRAILER {
        return Err(CertificateFailure::Trailer(recovered[k - 1]));
    }

    if exponent.len() != exponent_len {
        return Err(CertificateFailure::ExponentLength {
            declared: exponent_len,
            actual: exponent.len(),
        });
    }

    let mut hasher = Sha1::new();
    hasher.update(&recovered[1..hash_start]);
    hasher.update(remainder);
    hasher.update(exponent);
    hasher.update(extra);
    if hasher.finalize().as_slice() != &recovered[hash_start..k - 1] {
        return Err(CertificateFailure::HashMismatch);
    }

    Ok(RecoveredPublicKey {
        identifier,
        expiry,
        serial,
        hash_algorithm,
        public_key_algorithm,
        modulus,
        exponent: exponent.to_vec(),
    })
}

/// Header, format, trailer and hash checks shared by signed data objects
///
/// Returns the bytes between the format byte and the hash, at least
/// `min_body` of them.
fn check_signed_data<'r>(
    recovered: &'r [u8],
    format: u8,
    min_body: usize,
    extra: &[u8],
) -> Result<&'r [u8], CertificateFailure> {
    let k = recovered.len();
    if k < 2 + min_body + HASH_LEN + 1 {
        return Err(CertificateFailure::Truncated(k));
    }
    if recovered[0] != HEADER {
        return Err(CertificateFailure::Header(recovered[0]));
    }
    if recovered[1] != format {
        return Err(CertificateFailure::Format {
            expected: format,
            found: recovered[1],
        });
    }
    if recovered[k - 1] != TRAILER {
        return Err(CertificateFailure::Trailer(recovered[k - 1]));
    }

    let hash_start = k - HASH_LEN - 1;
    let mut hasher = Sha1::new();
    hasher.update(&recovered[1..hash_start]);
    hasher.update(extra);
    if hasher.finalize().as_slice() != &recovered[hash_start..k - 1] {
        return Err(CertificateFailure::HashMismatch);
    }

    Ok(&recovered[2..hash_start])
}

/// Issuer Public Key Certificate (tags 90, 92, 9F32 and CA index 8F)
#[derive(Debug, Clone)]
pub struct IssuerPublicKeyCertificate {
    pub(crate) ca_index: Option<u8>,
    pub(crate) signed: Option<Vec<u8>>,
    pub(crate) remainder: Vec<u8>,
    pub(crate) exponent: Option<Vec<u8>>,
    state: CertificateState<RecoveredPublicKey>,
}

impl Default for IssuerPublicKeyCertificate {
    fn default() -> Self {
        Self {
            ca_index: None,
            signed: None,
            remainder: Vec::new(),
            exponent: None,
            state: CertificateState::Unvalidated,
        }
    }
}

impl IssuerPublicKeyCertificate {
    pub fn new(ca_index: u8, signed: Vec<u8>, remainder: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self {
            ca_index: Some(ca_index),
            signed: Some(signed),
            remainder,
            exponent: Some(exponent),
            state: CertificateState::Unvalidated,
        }
    }

    pub fn ca_index(&self) -> Option<u8> {
        self.ca_index
    }

    pub fn signed(&self) -> Option<&[u8]> {
        self.signed.as_deref()
    }

    pub fn state(&self) -> &CertificateState<RecoveredPublicKey> {
        &self.state
    }

    /// Validate against the CA key for `rid`, once
    ///
    /// Later calls return the memoized state without touching the key store.
    pub fn validate(
        &mut self,
        ca_keys: &CaKeyStore,
        rid: &[u8],
        pan: Option<&str>,
    ) -> &CertificateState<RecoveredPublicKey> {
        if self.state.is_unvalidated() {
            let outcome = self.recover(ca_keys, rid, pan);
            self.state.settle(outcome, "issuer public key certificate");
        }
        &self.state
    }

    fn recover(
        &self,
        ca_keys: &CaKeyStore,
        rid: &[u8],
        pan: Option<&str>,
    ) -> Result<RecoveredPublicKey, CertificateFailure> {
        let signed = self
            .signed
            .as_deref()
            .ok_or(CertificateFailure::MissingData("issuer public key certificate (90)"))?;
        let index = self
            .ca_index
            .ok_or(CertificateFailure::MissingData("CA public key index (8F)"))?;
        let exponent = self
            .exponent
            .as_deref()
            .ok_or(CertificateFailure::MissingData("issuer public key exponent (9F32)"))?;

        let ca_key = ca_keys
            .get_ca_public_key(rid, index)
            .ok_or_else(|| CertificateFailure::CaKeyNotFound {
                rid: hex::encode_upper(rid),
                index,
            })?;

        let recovered = rsa_recover(signed, &ca_key)?;
        let key = parse_recovered(&recovered, ISSUER_LAYOUT, &self.remainder, exponent, &[])?;

        if let Some(pan) = pan {
            if !pan.starts_with(&key.identifier) {
                return Err(CertificateFailure::IssuerIdentifierMismatch {
                    identifier: key.identifier,
                    pan: pan.to_string(),
                });
            }
        }

        Ok(key)
    }
}

/// ICC Public Key Certificate (tags 9F46, 9F48, 9F47)
#[derive(Debug, Clone)]
pub struct IccPublicKeyCertificate {
    pub(crate) signed: Option<Vec<u8>>,
    pub(crate) remainder: Vec<u8>,
    pub(crate) exponent: Option<Vec<u8>>,
    state: CertificateState<RecoveredPublicKey>,
}

impl Default for IccPublicKeyCertificate {
    fn default() -> Self {
        Self {
            signed: None,
            remainder: Vec::new(),
            exponent: None,
            state: CertificateState::Unvalidated,
        }
    }
}

impl IccPublicKeyCertificate {
    pub fn new(signed: Vec<u8>, remainder: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self {
            signed: Some(signed),
            remainder,
            exponent: Some(exponent),
            state: CertificateState::Unvalidated,
        }
    }

    pub fn signed(&self) -> Option<&[u8]> {
        self.signed.as_deref()
    }

    pub fn state(&self) -> &CertificateState<RecoveredPublicKey> {
        &self.state
    }

    /// Validate with the recovered issuer key, once
    ///
    /// The issuer certificate must have been validated first; an issuer that
    /// is not `Valid` makes this certificate invalid.
    pub fn validate(
        &mut self,
        issuer: &CertificateState<RecoveredPublicKey>,
        pan: Option<&str>,
        static_data: &[u8],
    ) -> &CertificateState<RecoveredPublicKey> {
        if self.state.is_unvalidated() {
            let outcome = self.recover(issuer, pan, static_data);
            self.state.settle(outcome, "ICC public key certificate");
        }
        &self.state
    }

    fn recover(
        &self,
        issuer: &CertificateState<RecoveredPublicKey>,
        pan: Option<&str>,
        static_data: &[u8],
    ) -> Result<RecoveredPublicKey, CertificateFailure> {
        let signed = self
            .signed
            .as_deref()
            .ok_or(CertificateFailure::MissingData("ICC public key certificate (9F46)"))?;
        let exponent = self
            .exponent
            .as_deref()
            .ok_or(CertificateFailure::MissingData("ICC public key exponent (9F47)"))?;
        let issuer_key = issuer
            .valid()
            .ok_or(CertificateFailure::IssuerKeyUnavailable)?
            .public_key()?;

        let recovered = rsa_recover(signed, &issuer_key)?;
        let key = parse_recovered(&recovered, ICC_LAYOUT, &self.remainder, exponent, static_data)?;

        if let Some(pan) = pan {
            if key.identifier != pan {
                return Err(CertificateFailure::PanMismatch {
                    certificate: key.identifier,
                    pan: pan.to_string(),
                });
            }
        }

        Ok(key)
    }
}

/// Fields of validated Signed Static Application Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDataSignature {
    pub hash_algorithm: u8,
    pub data_authentication_code: [u8; 2],
}

/// Signed Static Application Data (tag 93), validated for SDA
#[derive(Debug, Clone)]
pub struct SignedStaticData {
    signed: Vec<u8>,
    state: CertificateState<StaticDataSignature>,
}

impl SignedStaticData {
    pub fn new(signed: Vec<u8>) -> Self {
        Self {
            signed,
            state: CertificateState::Unvalidated,
        }
    }

    pub fn state(&self) -> &CertificateState<StaticDataSignature> {
        &self.state
    }

    pub fn validate(
        &mut self,
        issuer: &CertificateState<RecoveredPublicKey>,
        static_data: &[u8],
    ) -> &CertificateState<StaticDataSignature> {
        if self.state.is_unvalidated() {
            let outcome = self.recover(issuer, static_data);
            self.state.settle(outcome, "signed static application data");
        }
        &self.state
    }

    fn recover(
        &self,
        issuer: &CertificateState<RecoveredPublicKey>,
        static_data: &[u8],
    ) -> Result<StaticDataSignature, CertificateFailure> {
        let issuer_key = issuer
            .valid()
            .ok_or(CertificateFailure::IssuerKeyUnavailable)?
            .public_key()?;
        let recovered = rsa_recover(&self.signed, &issuer_key)?;
        let body = check_signed_data(&recovered, FORMAT_SIGNED_STATIC_DATA, 3, static_data)?;

        Ok(StaticDataSignature {
            hash_algorithm: body[0],
            data_authentication_code: [body[1], body[2]],
        })
    }
}

/// Fields of validated Signed Dynamic Application Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicData {
    pub hash_algorithm: u8,
    pub icc_dynamic_number: Vec<u8>,
    pub dynamic_data: Vec<u8>,
}

/// Validate Signed Dynamic Application Data (tag 9F4B) for DDA
///
/// `ddol_data` is the data sent with INTERNAL AUTHENTICATE.
pub fn verify_signed_dynamic_data(
    sdad: &[u8],
    icc_key: &RecoveredPublicKey,
    ddol_data: &[u8],
) -> Result<DynamicData, CertificateFailure> {
    let key = icc_key.public_key()?;
    let recovered = rsa_recover(sdad, &key)?;
    let body = check_signed_data(&recovered, FORMAT_SIGNED_DYNAMIC_DATA, 2, ddol_data)?;

    let hash_algorithm = body[0];
    let dynamic_len = body[1] as usize;
    let dynamic_data = body
        .get(2..2 + dynamic_len)
        .ok_or(CertificateFailure::Truncated(recovered.len()))?
        .to_vec();

    let icc_dynamic_number = match dynamic_data.split_first() {
        Some((&n, rest)) if n as usize <= rest.len() => rest[..n as usize].to_vec(),
        _ => Vec::new(),
    };

    Ok(DynamicData {
        hash_algorithm,
        icc_dynamic_number,
        dynamic_data,
    })
}

/// Result of a DDA attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// Preconditions not met, no command was sent
    NotAttempted(&'static str),
    Valid(DynamicData),
    Invalid(CertificateFailure),
}

impl AuthenticationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, AuthenticationOutcome::Valid(_))
    }
}

/// Authentication method detected from card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMethod {
    Sda,
    Dda,
    Cda,
    None,
}

impl AuthenticationMethod {
    /// Detect authentication method from AIP byte 1, preferring CDA > DDA > SDA
    pub fn from_aip(aip: &[u8]) -> Self {
        let Some(&byte1) = aip.first() else {
            return AuthenticationMethod::None;
        };

        if byte1 & 0x01 != 0 {
            AuthenticationMethod::Cda
        } else if byte1 & 0x20 != 0 {
            AuthenticationMethod::Dda
        } else if byte1 & 0x40 != 0 {
            AuthenticationMethod::Sda
        } else {
            AuthenticationMethod::None
        }
    }
}

/// Certificate verification result
#[derive(Debug, Clone)]
pub struct CertificateVerificationResult {
    pub auth_method: AuthenticationMethod,
    pub ca_key_found: bool,
    pub issuer_cert_valid: bool,
    pub icc_cert_valid: bool,
    pub static_data_valid: bool,
    pub chain_valid: bool,
    pub errors: Vec<String>,
}

impl CertificateVerificationResult {
    pub fn new(auth_method: AuthenticationMethod) -> Self {
        Self {
            auth_method,
            ca_key_found: false,
            issuer_cert_valid: false,
            icc_cert_valid: false,
            static_data_valid: false,
            chain_valid: false,
            errors: Vec::new(),
        }
    }
}
