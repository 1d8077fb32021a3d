//! Scripted card and signing fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::OnceLock;

use emv_ca_keys::{CaKeyStore, CaPublicKey, CaRecord, HASH_ALGORITHM_SHA1, PUBLIC_KEY_ALGORITHM_RSA};
use emv_card::{CardTransport, TerminalDataProvider, TransportError};
use emv_common::BerTlv;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use sha1::{Digest, Sha1};

pub const RID: [u8; 5] = [0xA0, 0x00, 0x00, 0x00, 0x04];
pub const AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];
pub const CA_INDEX: u8 = 0xF1;
pub const PAN: [u8; 8] = [0x54, 0x13, 0x33, 0x00, 0x89, 0x01, 0x04, 0x34];
pub const ISSUER_ID: [u8; 4] = [0x54, 0x13, 0x33, 0xFF];
pub const UNPREDICTABLE_NUMBER: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
pub const ATR: [u8; 4] = [0x3B, 0x02, 0x14, 0x50];

/// Card that answers from a fixed list of responses
pub struct MockCard {
    responses: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
    pub disconnected: Option<bool>,
}

impl MockCard {
    pub fn new(responses: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            sent: Vec::new(),
            disconnected: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }

    /// Commands sent with the given INS byte
    pub fn sent_with_ins(&self, ins: u8) -> Vec<&[u8]> {
        self.sent
            .iter()
            .filter(|c| c.get(1) == Some(&ins))
            .map(Vec::as_slice)
            .collect()
    }
}

impl CardTransport for MockCard {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.sent.push(command.to_vec());
        self.responses.pop_front().ok_or(TransportError::Disconnected)
    }

    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        Ok(ATR.to_vec())
    }

    fn disconnect(&mut self, reset: bool) -> Result<(), TransportError> {
        self.disconnected = Some(reset);
        Ok(())
    }
}

/// Terminal data with a fixed unpredictable number
pub struct FixedTerminal;

impl TerminalDataProvider for FixedTerminal {
    fn resolve(&self, tag: &[u8], _length: usize) -> Option<Vec<u8>> {
        match tag {
            [0x9F, 0x37] => Some(UNPREDICTABLE_NUMBER.to_vec()),
            _ => None,
        }
    }
}

pub fn tlv(tag: &[u8], value: &[u8]) -> Vec<u8> {
    BerTlv::new(tag, value).to_bytes()
}

/// Response data followed by 9000
pub fn ok(data: &[u8]) -> Vec<u8> {
    [data, &[0x90, 0x00]].concat()
}

pub fn status(sw: u16) -> Vec<u8> {
    sw.to_be_bytes().to_vec()
}

/// FCI template for a DF name with the given proprietary template contents
pub fn fci(df_name: &[u8], proprietary: &[u8]) -> Vec<u8> {
    tlv(&[0x6F], &[tlv(&[0x84], df_name), tlv(&[0xA5], proprietary)].concat())
}

pub fn application_template(aid: &[u8], label: &str, priority: Option<u8>) -> Vec<u8> {
    let mut value = [tlv(&[0x4F], aid), tlv(&[0x50], label.as_bytes())].concat();
    if let Some(priority) = priority {
        value.extend(tlv(&[0x87], &[priority]));
    }
    tlv(&[0x61], &value)
}

pub struct Keys {
    pub ca: RsaPrivateKey,
    pub issuer: RsaPrivateKey,
    pub icc: RsaPrivateKey,
}

/// Deterministic CA (1024 bit), issuer and ICC (512 bit) keys
pub fn keys() -> &'static Keys {
    static KEYS: OnceLock<Keys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(0x454D_5643);
        Keys {
            ca: RsaPrivateKey::new(&mut rng, 1024).expect("CA key"),
            issuer: RsaPrivateKey::new(&mut rng, 512).expect("issuer key"),
            icc: RsaPrivateKey::new(&mut rng, 512).expect("ICC key"),
        }
    })
}

pub fn modulus(key: &RsaPrivateKey) -> Vec<u8> {
    key.n().to_bytes_be()
}

pub fn exponent(key: &RsaPrivateKey) -> Vec<u8> {
    key.e().to_bytes_be()
}

/// Raw RSA signature: `message^d mod n`, left-padded to the modulus length
pub fn sign(key: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
    let k = key.size();
    assert_eq!(message.len(), k, "message must be as long as the modulus");
    let signed = BigUint::from_bytes_be(message).modpow(key.d(), key.n()).to_bytes_be();
    let mut out = vec![0u8; k - signed.len()];
    out.extend(signed);
    out
}

fn seal(mut data: Vec<u8>, k: usize, hashed_tail: &[&[u8]]) -> Vec<u8> {
    data.resize(k - 21, 0xBB);
    let mut hasher = Sha1::new();
    hasher.update(&data[1..]);
    for part in hashed_tail {
        hasher.update(part);
    }
    data.extend_from_slice(&hasher.finalize());
    data.push(0xBC);
    data
}

/// Recovered-form public key certificate and its remainder
pub fn key_certificate(
    signer_len: usize,
    format: u8,
    identifier: &[u8],
    public_modulus: &[u8],
    public_exponent: &[u8],
    extra: &[u8],
) -> (Vec<u8>, Vec<u8>) {
    let mut data = vec![0x6A, format];
    data.extend_from_slice(identifier);
    data.extend_from_slice(&[0x12, 0x30]);
    data.extend_from_slice(&[0x00, 0x00, 0x01]);
    data.extend_from_slice(&[
        HASH_ALGORITHM_SHA1,
        PUBLIC_KEY_ALGORITHM_RSA,
        public_modulus.len() as u8,
        public_exponent.len() as u8,
    ]);

    let room = signer_len - data.len() - 21;
    let remainder = if public_modulus.len() <= room {
        data.extend_from_slice(public_modulus);
        Vec::new()
    } else {
        data.extend_from_slice(&public_modulus[..room]);
        public_modulus[room..].to_vec()
    };

    let recovered = seal(data, signer_len, &[&remainder, public_exponent, extra]);
    (recovered, remainder)
}

/// Issuer certificate signed by the CA key: (90, 92, 9F32)
pub fn issuer_certificate() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let keys = keys();
    let exponent = exponent(&keys.issuer);
    let (recovered, remainder) =
        key_certificate(keys.ca.size(), 0x02, &ISSUER_ID, &modulus(&keys.issuer), &exponent, &[]);
    (sign(&keys.ca, &recovered), remainder, exponent)
}

/// ICC certificate signed by the issuer key: (9F46, 9F48, 9F47)
pub fn icc_certificate(static_data: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let keys = keys();
    let exponent = exponent(&keys.icc);
    let mut identifier = PAN.to_vec();
    identifier.resize(10, 0xFF);
    let (recovered, remainder) = key_certificate(
        keys.issuer.size(),
        0x04,
        &identifier,
        &modulus(&keys.icc),
        &exponent,
        static_data,
    );
    (sign(&keys.issuer, &recovered), remainder, exponent)
}

/// Signed static application data (93) with data authentication code DA C0
pub fn signed_static_data(static_data: &[u8]) -> Vec<u8> {
    let keys = keys();
    let recovered = seal(
        vec![0x6A, 0x03, HASH_ALGORITHM_SHA1, 0xDA, 0xC0],
        keys.issuer.size(),
        &[static_data],
    );
    sign(&keys.issuer, &recovered)
}

/// Signed dynamic application data carrying `icc_dynamic_number`
pub fn signed_dynamic_data(icc_dynamic_number: &[u8], ddol_data: &[u8]) -> Vec<u8> {
    let keys = keys();
    let mut dynamic = vec![icc_dynamic_number.len() as u8];
    dynamic.extend_from_slice(icc_dynamic_number);

    let mut data = vec![0x6A, 0x05, HASH_ALGORITHM_SHA1, dynamic.len() as u8];
    data.extend(dynamic);
    sign(&keys.icc, &seal(data, keys.icc.size(), &[ddol_data]))
}

/// Store holding the fixture CA key under [`RID`] / [`CA_INDEX`]
pub fn ca_key_store() -> CaKeyStore {
    let keys = keys();
    let modulus = modulus(&keys.ca);
    let exponent = exponent(&keys.ca);
    let key = CaPublicKey {
        index: CA_INDEX,
        sha1_hash: CaPublicKey::compute_checksum(&RID, CA_INDEX, &modulus, &exponent),
        modulus,
        exponent,
        hash_algorithm: HASH_ALGORITHM_SHA1,
        public_key_algorithm: PUBLIC_KEY_ALGORITHM_RSA,
        expiration_date: Some("311231".to_string()),
    };
    CaKeyStore::from_records([CaRecord {
        rid: RID.to_vec(),
        name: "Test CA".to_string(),
        description: "Fixture certification authority".to_string(),
        keys: vec![key],
    }])
    .expect("fixture CA store")
}

/// Everything an offline-authenticating card keeps in its records
pub struct CardImage {
    /// Value of the ODA record template (record 1)
    pub oda_record: Vec<u8>,
    pub aip: [u8; 2],
    pub records: Vec<Vec<u8>>,
}

impl CardImage {
    /// Static data to authenticate: ODA record value followed by the AIP
    pub fn static_data(&self) -> Vec<u8> {
        [self.oda_record.as_slice(), &self.aip].concat()
    }

    /// GPO response naming SFI 1 records 1 to 3, the first one for ODA
    pub fn gpo_response(&self) -> Vec<u8> {
        tlv(
            &[0x77],
            &[tlv(&[0x82], &self.aip), tlv(&[0x94], &[0x08, 0x01, 0x03, 0x01])].concat(),
        )
    }
}

/// Card image signed with the fixture keys
pub fn card_image(aip: [u8; 2]) -> CardImage {
    let oda_record = [
        tlv(&[0x5A], &PAN),
        tlv(&[0x5F, 0x24], &[0x30, 0x12, 0x31]),
        tlv(&[0x9F, 0x4A], &[0x82]),
    ]
    .concat();
    let static_data = [oda_record.as_slice(), &aip].concat();

    let (issuer_cert, issuer_remainder, issuer_exponent) = issuer_certificate();
    let (icc_cert, icc_remainder, icc_exponent) = icc_certificate(&static_data);

    let mut issuer_record = [
        tlv(&[0x8F], &[CA_INDEX]),
        tlv(&[0x90], &issuer_cert),
        tlv(&[0x9F, 0x32], &issuer_exponent),
    ]
    .concat();
    if !issuer_remainder.is_empty() {
        issuer_record.extend(tlv(&[0x92], &issuer_remainder));
    }

    let icc_record = [
        tlv(&[0x9F, 0x46], &icc_cert),
        tlv(&[0x9F, 0x47], &icc_exponent),
        tlv(&[0x9F, 0x48], &icc_remainder),
        tlv(&[0x9F, 0x49], &[0x9F, 0x37, 0x04]),
        tlv(&[0x93], &signed_static_data(&static_data)),
    ]
    .concat();

    CardImage {
        records: vec![
            tlv(&[0x70], &oda_record),
            tlv(&[0x70], &issuer_record),
            tlv(&[0x70], &icc_record),
        ],
        oda_record,
        aip,
    }
}
