//! Structured diagnostic dump of a card session

use std::fmt::{self, Display, Formatter};

use emv_common::{TagRegistry, ValueType};

use crate::application::{Application, Dol};
use crate::card::{Card, DirectoryKind};
use crate::crypto::{AuthenticationOutcome, CertificateState};

/// Renders everything parsed from a card, naming tags through the registry
pub struct CardDump<'a> {
    card: &'a Card,
    tags: &'a TagRegistry,
}

impl<'a> CardDump<'a> {
    pub fn new(card: &'a Card, tags: &'a TagRegistry) -> Self {
        Self { card, tags }
    }

    fn application(&self, f: &mut Formatter<'_>, app: &Application) -> fmt::Result {
        writeln!(f, "Application {} ({})", hex::encode_upper(&app.aid), app.name())?;
        if let Some(priority) = app.priority {
            writeln!(f, "  Priority: {}", priority)?;
        }
        if let Some(language) = &app.language_preference {
            writeln!(f, "  Language: {}", language)?;
        }
        if let Some(index) = app.issuer_code_table_index {
            writeln!(f, "  Issuer code table: {}", index)?;
        }
        if let Some(aip) = app.aip {
            writeln!(
                f,
                "  AIP: {} (SDA: {}, DDA: {}, CDA: {})",
                hex::encode_upper(aip.0),
                yes_no(aip.supports_sda()),
                yes_no(aip.supports_dda()),
                yes_no(aip.supports_cda())
            )?;
        }
        for entry in &app.afl {
            writeln!(
                f,
                "  AFL: SFI {} records {}-{} (ODA {})",
                entry.sfi, entry.first_record, entry.last_record, entry.oda_records
            )?;
        }
        for (name, dol) in [("PDOL", &app.pdol), ("DDOL", &app.ddol), ("CDOL1", &app.cdol1), ("CDOL2", &app.cdol2)] {
            if let Some(dol) = dol {
                writeln!(f, "  {}: {}", name, self.dol(dol))?;
            }
        }
        if let Some(failure) = &app.processing_failure {
            writeln!(f, "  Processing failed: {}", failure)?;
        }

        if !app.tags.is_empty() {
            writeln!(f, "  Tags:")?;
            for (tag, value) in &app.tags {
                let resolved = self.tags.resolve(tag);
                writeln!(
                    f,
                    "    {:<6} {}: {}",
                    hex::encode_upper(tag),
                    resolved.name(),
                    render_value(resolved.value_type(), value)
                )?;
            }
        }

        if !app.records.is_empty() {
            writeln!(f, "  Records:")?;
            for record in &app.records {
                writeln!(f, "    SFI {} #{}: {}", record.sfi, record.number, hex::encode_upper(&record.data))?;
            }
        }

        if let Some(cert) = &app.issuer_certificate {
            writeln!(f, "  Issuer public key certificate: {}", state(cert.state()))?;
        }
        if let Some(cert) = &app.icc_certificate {
            writeln!(f, "  ICC public key certificate: {}", state(cert.state()))?;
        }
        if let Some(ssad) = &app.signed_static_data {
            writeln!(f, "  Signed static data: {}", state(ssad.state()))?;
        }
        match &app.authentication {
            Some(AuthenticationOutcome::Valid(data)) => writeln!(
                f,
                "  Dynamic authentication: valid (ICC dynamic number {})",
                hex::encode_upper(&data.icc_dynamic_number)
            )?,
            Some(AuthenticationOutcome::Invalid(reason)) => {
                writeln!(f, "  Dynamic authentication: invalid ({})", reason)?
            }
            Some(AuthenticationOutcome::NotAttempted(why)) => {
                writeln!(f, "  Dynamic authentication: not attempted ({})", why)?
            }
            None => {}
        }

        if let Some(atc) = app.atc {
            writeln!(f, "  ATC: {}", atc)?;
        }
        if let Some(atc) = app.last_online_atc {
            writeln!(f, "  Last online ATC: {}", atc)?;
        }
        if let Some(tries) = app.pin_try_counter {
            writeln!(f, "  PIN tries remaining: {}", tries)?;
        }
        if !app.transaction_log.is_empty() {
            writeln!(f, "  Transaction log:")?;
            for (i, entry) in app.transaction_log.iter().enumerate() {
                writeln!(f, "    {:>2}: {}", i + 1, hex::encode_upper(entry))?;
            }
        }
        Ok(())
    }

    fn dol(&self, dol: &Dol) -> String {
        dol.entries()
            .iter()
            .map(|e| format!("{}({})", hex::encode_upper(&e.tag), e.length))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for CardDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let card = self.card;
        writeln!(f, "ATR: {}", hex::encode_upper(&card.atr))?;
        writeln!(f, "Interface: {}", card.interface)?;

        match &card.directory {
            Some(dir) => {
                let kind = match dir.kind {
                    DirectoryKind::Pse => "PSE",
                    DirectoryKind::Ppse => "PPSE",
                };
                match dir.sfi {
                    Some(sfi) => writeln!(f, "Directory: {} (SFI {})", kind, sfi)?,
                    None => writeln!(f, "Directory: {}", kind)?,
                }
            }
            None => writeln!(f, "Directory: none")?,
        }
        if let Some(mf) = &card.master_file {
            writeln!(f, "Master file FCI: {}", hex::encode_upper(mf))?;
        }

        writeln!(f, "Applications: {}", card.applications.len())?;
        for app in &card.applications {
            writeln!(f)?;
            self.application(f, app)?;
        }
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn state<T>(state: &CertificateState<T>) -> String {
    match state {
        CertificateState::Unvalidated => "not validated".to_string(),
        CertificateState::Valid(_) => "valid".to_string(),
        CertificateState::Invalid(reason) => format!("invalid ({})", reason),
    }
}

/// Text values print as text when they are printable, everything else as hex
fn render_value(value_type: ValueType, value: &[u8]) -> String {
    match value_type {
        ValueType::Text if value.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => {
            format!("\"{}\"", String::from_utf8_lossy(value))
        }
        _ => hex::encode_upper(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_dump_names_tags() {
        let mut app = Application::new(&hex!("A0 00 00 00 04 10 10"));
        app.ingest(&hex!("50 04 54 45 53 54 5A 02 54 11 DF 7F 01 00")).unwrap();

        let mut card = Card::new(hex!("3B 02 14 50").to_vec());
        card.applications.push(app);

        let registry = TagRegistry::emv();
        let text = CardDump::new(&card, &registry).to_string();

        assert!(text.contains("ATR: 3B021450"));
        assert!(text.contains("Directory: none"));
        assert!(text.contains("Application A0000000041010 (TEST)"));
        assert!(text.contains("\"TEST\""));
        assert!(text.contains("DF7F   Unhandled Tag: 00"));
    }
}
