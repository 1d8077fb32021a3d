//! Formatter for card information output

use emv_card::Application;
use emv_common::TagRegistry;

use crate::formatters::{check, FormatMode};

use super::card_info::CardInfoData;
use super::display_tags;

/// Format and output card information
pub fn format_card_info(info: &CardInfoData, tags: &TagRegistry, format_mode: FormatMode) {
    println!("ATR: {}", hex::encode_upper(&info.card.atr));
    println!("Interface: {}\n", info.card.interface);

    print_applications(info);

    let Some(app) = info.selected() else {
        println!("No application selected");
        return;
    };

    print_selected(app, tags, format_mode);
    print_records(app, format_mode);
    print_certificate_verification(info);

    println!("\n=== Card Reading Complete ===");
}

fn print_applications(info: &CardInfoData) {
    println!("=== Discovered Applications ===\n");

    match &info.card.directory {
        Some(dir) => println!("Found via {}\n", String::from_utf8_lossy(dir.kind.name())),
        None => println!("Found via known AID search\n"),
    }

    for (i, app) in info.card.applications.iter().enumerate() {
        println!("Application {}:", i + 1);
        println!("  AID: {}", hex::encode_upper(&app.aid));
        if let Some(ref label) = app.label {
            println!("  Label: {}", label);
        }
        if let Some(ref pref_name) = app.preferred_name {
            println!("  Preferred Name: {}", pref_name);
        }
        if let Some(priority) = app.priority {
            println!("  Priority: {} (lower = higher priority)", priority);
        }
        println!();
    }
}

fn print_selected(app: &Application, tags: &TagRegistry, format_mode: FormatMode) {
    println!("=== Selected Application {} ===\n", app.name());

    if format_mode == FormatMode::Raw {
        if let Some(ref fci) = app.fci {
            println!("Raw SELECT response ({} bytes):", fci.len());
            println!("{}\n", hex::encode_upper(fci));
        }
    }

    if let Some(aip) = app.aip {
        println!(
            "AIP: {} (SDA: {}, DDA: {}, CDA: {})",
            hex::encode_upper(aip.0),
            check(aip.supports_sda()),
            check(aip.supports_dda()),
            check(aip.supports_cda())
        );
    }
    for entry in &app.afl {
        println!(
            "AFL: SFI {} records {}-{} ({} for offline authentication)",
            entry.sfi, entry.first_record, entry.last_record, entry.oda_records
        );
    }
    if let Some(atc) = app.atc {
        println!("ATC: {}", atc);
    }
    if let Some(tries) = app.pin_try_counter {
        println!("PIN tries remaining: {}", tries);
    }
    println!();

    println!("Data objects:");
    display_tags(tags, app, format_mode);
    println!();
}

fn print_records(app: &Application, format_mode: FormatMode) {
    println!("Records read: {}\n", app.records.len());

    if format_mode != FormatMode::Raw {
        return;
    }
    for record in &app.records {
        println!("SFI {} record {}:", record.sfi, record.number);
        println!("  Data ({} bytes): {}", record.data.len(), hex::encode_upper(&record.data));
    }
    println!();
}

fn print_certificate_verification(info: &CardInfoData) {
    println!("=== Certificate Chain Verification ===\n");

    let summary = info.certificate_summary();

    println!("Certificate data found:");
    println!("  - CA Public Key Index (8F): {}", check(summary.has_ca_index));
    println!("  - Issuer Certificate (90): {}", check(summary.has_issuer_cert));
    println!("  - ICC Certificate (9F46): {}", check(summary.has_icc_cert));
    println!();

    println!("Authentication Method: {:?}", summary.auth_method);
    println!("CA Key Found: {}", check(summary.ca_key_found));
    println!("Issuer Certificate Valid: {}", check(summary.issuer_cert_valid));
    println!("ICC Certificate Valid: {}", check(summary.icc_cert_valid));
    println!("Signed Static Data Valid: {}", check(summary.static_data_valid));
    println!("Chain Valid: {}", check(summary.chain_valid));

    if !summary.errors.is_empty() {
        println!("\nErrors:");
        for error in &summary.errors {
            println!("  - {}", error);
        }
    }
}
