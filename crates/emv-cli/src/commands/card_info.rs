//! Data structures for card information

use emv_card::crypto::{AuthenticationMethod, CertificateVerificationResult};
use emv_card::{Application, Card};

/// Complete card information collected during reading
#[derive(Debug, Clone)]
pub struct CardInfoData {
    pub card: Card,
    pub verification_result: CertificateVerificationResult,
}

impl CardInfoData {
    pub fn selected(&self) -> Option<&Application> {
        self.card.selected_application()
    }

    /// Create certificate data summary
    pub fn certificate_summary(&self) -> CertificateSummary {
        CertificateSummary {
            has_ca_index: self.has_tag(&[0x8F]),
            has_issuer_cert: self.has_tag(&[0x90]),
            has_icc_cert: self.has_tag(&[0x9F, 0x46]),
            auth_method: self.verification_result.auth_method,
            ca_key_found: self.verification_result.ca_key_found,
            issuer_cert_valid: self.verification_result.issuer_cert_valid,
            icc_cert_valid: self.verification_result.icc_cert_valid,
            static_data_valid: self.verification_result.static_data_valid,
            chain_valid: self.verification_result.chain_valid,
            errors: self.verification_result.errors.clone(),
        }
    }

    fn has_tag(&self, tag: &[u8]) -> bool {
        self.selected().is_some_and(|app| app.get(tag).is_some())
    }
}

/// Summary of certificate verification
#[derive(Debug, Clone)]
pub struct CertificateSummary {
    pub has_ca_index: bool,
    pub has_issuer_cert: bool,
    pub has_icc_cert: bool,
    pub auth_method: AuthenticationMethod,
    pub ca_key_found: bool,
    pub issuer_cert_valid: bool,
    pub icc_cert_valid: bool,
    pub static_data_valid: bool,
    pub chain_valid: bool,
    pub errors: Vec<String>,
}
