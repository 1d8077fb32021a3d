//! Session state machine against a scripted card

mod common;

use common::*;
use emv_ca_keys::CaKeyStore;
use emv_card::{
    DefaultTerminalData, DirectoryKind, EmvError, EmvSession, InterfaceType, KnownAid, PinVerification,
    SessionState, StatusWord, TransportError,
};
use emv_common::TagRegistry;
use hex_literal::hex;

const PSE: &[u8] = b"1PAY.SYS.DDF01";
const PPSE: &[u8] = b"2PAY.SYS.DDF01";
const VISA: [u8; 7] = hex!("A0 00 00 00 03 10 10");
const MAESTRO: [u8; 7] = hex!("A0 00 00 00 04 30 60");

fn session<'a>(
    card: &'a mut MockCard,
    tags: &'a TagRegistry,
    ca_keys: &'a CaKeyStore,
) -> EmvSession<'a, &'a mut MockCard> {
    EmvSession::new(card, tags, ca_keys)
}

/// SELECT PSE naming SFI 1, one directory record, then record not found
fn pse_with(templates: &[Vec<u8>]) -> Vec<Vec<u8>> {
    vec![
        ok(&fci(PSE, &tlv(&[0x88], &[0x01]))),
        ok(&tlv(&[0x70], &templates.concat())),
        status(0x6A83),
    ]
}

fn mastercard_fci(extra: &[u8]) -> Vec<u8> {
    fci(&AID, &[tlv(&[0x50], b"MASTERCARD"), extra.to_vec()].concat())
}

#[test]
fn test_pse_discovery_reads_directory_records() {
    let mut card = MockCard::new(pse_with(&[
        application_template(&AID, "MASTERCARD", Some(2)),
        application_template(&VISA, "VISA", Some(1)),
    ]));
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    let discovered = session.init_card().unwrap();

    assert_eq!(discovered.atr, ATR);
    assert_eq!(discovered.interface, InterfaceType::Contact);
    let directory = discovered.directory.as_ref().unwrap();
    assert_eq!(directory.kind, DirectoryKind::Pse);
    assert_eq!(directory.sfi, Some(1));

    let aids: Vec<&[u8]> = discovered.aids().collect();
    assert_eq!(aids, vec![&VISA[..], &AID[..]]);
    assert_eq!(discovered.applications[0].label.as_deref(), Some("VISA"));
    assert_eq!(session.state(), SessionState::CandidateListBuild);
    drop(session);

    assert_eq!(card.remaining(), 0);
    assert_eq!(
        card.sent_with_ins(0xB2),
        vec![&hex!("00 B2 01 0C 00")[..], &hex!("00 B2 02 0C 00")[..]]
    );
}

#[test]
fn test_ppse_fallback_marks_contactless() {
    let ppse = fci(
        PPSE,
        &tlv(&[0xBF, 0x0C], &application_template(&AID, "MASTERCARD", Some(1))),
    );
    // the card announces the FCI with 61xx and returns it on GET RESPONSE
    let mut card = MockCard::new([status(0x6A82), vec![0x61, ppse.len() as u8], ok(&ppse)]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    let discovered = session.init_card().unwrap();

    assert_eq!(discovered.interface, InterfaceType::Contactless);
    let directory = discovered.directory.as_ref().unwrap();
    assert_eq!(directory.kind, DirectoryKind::Ppse);
    assert_eq!(directory.sfi, None);
    assert_eq!(discovered.applications.len(), 1);
    assert_eq!(discovered.applications[0].aid, AID);
    drop(session);

    assert_eq!(card.sent[2], vec![0x00, 0xC0, 0x00, 0x00, ppse.len() as u8]);
}

#[test]
fn test_known_aid_search_follows_next_occurrences() {
    let first = mastercard_fci(&[]);
    let second = fci(&MAESTRO, &tlv(&[0x50], b"MAESTRO"));
    let mut card = MockCard::new([
        status(0x6A82),
        status(0x6A82),
        ok(&first),
        ok(&second),
        // some cards answer the same FCI forever
        ok(&second),
        status(0x6A82),
    ]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys).with_known_aids(vec![
        KnownAid::new(&RID, "Mastercard", true),
        KnownAid::new(&hex!("A0 00 00 02 77 10 10"), "Interac", false),
    ]);
    let discovered = session.init_card().unwrap();

    assert!(discovered.directory.is_none());
    assert_eq!(discovered.interface, InterfaceType::Contact);
    let aids: Vec<&[u8]> = discovered.aids().collect();
    assert_eq!(aids, vec![&AID[..], &MAESTRO[..]]);
    drop(session);

    assert_eq!(card.remaining(), 0);
    assert_eq!(card.sent[3], hex!("00 A4 04 02 05 A0 00 00 00 04"));
    assert_eq!(card.sent[5], hex!("00 A4 04 00 07 A0 00 00 02 77 10 10 00"));
}

#[test]
fn test_next_occurrence_stops_at_file_not_found() {
    let mut card = MockCard::new([
        status(0x6A82),
        status(0x6A82),
        ok(&mastercard_fci(&[])),
        status(0x6A82),
    ]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys)
        .with_known_aids(vec![KnownAid::new(&RID, "Mastercard", true)]);
    assert_eq!(session.init_card().unwrap().applications.len(), 1);
}

#[test]
fn test_duplicate_candidates_are_merged() {
    let mut card = MockCard::new([
        status(0x6A82),
        status(0x6A82),
        ok(&mastercard_fci(&[])),
        ok(&mastercard_fci(&[])),
    ]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys).with_known_aids(vec![
        KnownAid::new(&RID, "Mastercard", false),
        KnownAid::new(&AID, "Mastercard Credit", false),
    ]);
    assert_eq!(session.init_card().unwrap().applications.len(), 1);
}

#[test]
fn test_unsupported_card_keeps_atr() {
    let mut card = MockCard::new([status(0x6A82), status(0x6A82), status(0x6A82)]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys)
        .with_known_aids(vec![KnownAid::new(&AID, "Mastercard", false)]);
    assert!(matches!(session.init_card(), Err(EmvError::UnsupportedCard)));

    let discovered = session.card().unwrap();
    assert_eq!(discovered.atr, ATR);
    assert!(discovered.applications.is_empty());
}

#[test]
fn test_malformed_directory_record_is_an_error() {
    // the record template claims 5 bytes but carries 3
    let mut card = MockCard::new([
        ok(&fci(PSE, &tlv(&[0x88], &[0x01]))),
        ok(&hex!("70 05 61 03 4F")),
        status(0x6A83),
        ok(&mastercard_fci(&[])),
    ]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys)
        .with_known_aids(vec![KnownAid::new(&AID, "Mastercard", false)]);
    assert!(matches!(session.init_card(), Err(EmvError::MalformedData(_))));
    assert_eq!(session.card().unwrap().atr, ATR);
    drop(session);

    // no known AID was tried
    assert_eq!(card.remaining(), 1);
    assert_eq!(card.sent_with_ins(0xA4).len(), 1);
}

#[test]
fn test_directory_sfi_out_of_range_is_an_error() {
    let mut card = MockCard::new([ok(&fci(PSE, &tlv(&[0x88], &[0x1F])))]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    assert!(matches!(session.init_card(), Err(EmvError::MalformedData(_))));
    drop(session);

    assert!(card.sent_with_ins(0xB2).is_empty());
}

#[test]
fn test_directory_read_failure_falls_back_to_known_aids() {
    let mut card = MockCard::new([
        ok(&fci(PSE, &tlv(&[0x88], &[0x01]))),
        status(0x6985),
        ok(&mastercard_fci(&[])),
    ]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys)
        .with_known_aids(vec![KnownAid::new(&AID, "Mastercard", false)]);
    let discovered = session.init_card().unwrap();

    assert_eq!(discovered.applications.len(), 1);
    assert_eq!(discovered.applications[0].aid, AID);
}

#[test]
fn test_transport_failure_ends_discovery() {
    let mut card = MockCard::new(Vec::<Vec<u8>>::new());
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    assert!(matches!(
        session.init_card(),
        Err(EmvError::Transport(TransportError::Disconnected))
    ));
}

#[test]
fn test_master_file_probe() {
    let mf = tlv(&[0x6F], &tlv(&[0x84], &hex!("3F 00")));
    let mut responses = vec![ok(&mf)];
    responses.extend(pse_with(&[application_template(&AID, "MASTERCARD", None)]));
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let config = emv_card::SessionConfig {
        probe_master_file: true,
        ..Default::default()
    };
    let mut session = session(&mut card, &tags, &ca_keys).with_config(config);
    assert_eq!(session.init_card().unwrap().master_file.as_deref(), Some(mf.as_slice()));
    drop(session);

    assert_eq!(card.sent[0], hex!("00 A4 00 00 02 3F 00 00"));
}

#[test]
fn test_select_requires_initialised_card() {
    let mut card = MockCard::new(Vec::<Vec<u8>>::new());
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    assert!(matches!(session.select_application(&AID), Err(EmvError::InvalidState(_))));
    assert!(matches!(
        session.initiate_application_processing(),
        Err(EmvError::InvalidState(_))
    ));
}

#[test]
fn test_select_then_reselect_is_rejected() {
    let mut responses = pse_with(&[application_template(&AID, "MASTERCARD", None)]);
    responses.push(ok(&mastercard_fci(&tlv(&[0x9F, 0x12], b"MC DEBIT"))));
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    let app = session.select_application(&AID).unwrap();
    assert_eq!(app.name(), "MC DEBIT");
    assert!(app.fci.is_some());
    assert_eq!(session.state(), SessionState::Selected);

    assert!(matches!(session.select_application(&AID), Err(EmvError::InvalidState(_))));
    drop(session);
    assert_eq!(card.sent.len(), 4);
}

#[test]
fn test_select_failure_is_card_protocol_error() {
    let mut responses = pse_with(&[application_template(&AID, "MASTERCARD", None)]);
    responses.push(status(0x6A81));
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    match session.select_application(&AID) {
        Err(EmvError::CardProtocol { command, status }) => {
            assert_eq!(command, "SELECT");
            assert_eq!(status, StatusWord::new(0x6A, 0x81));
        }
        other => panic!("unexpected {:?}", other.map(|a| a.aid.clone())),
    }
}

#[test]
fn test_processing_reads_afl_records() {
    let pdol = tlv(&[0x9F, 0x38], &hex!("9F 1A 02"));
    let record_1 = tlv(&[0x70], &[tlv(&[0x5A], &PAN), tlv(&[0x5F, 0x24], &hex!("30 12 31"))].concat());
    let record_2 = tlv(&[0x70], &tlv(&[0x5F, 0x20], b"CARDHOLDER/TEST"));
    let record_3 = tlv(&[0x70], &tlv(&[0x9F, 0x08], &hex!("00 02")));

    let mut responses = pse_with(&[application_template(&AID, "MASTERCARD", None)]);
    responses.extend([
        ok(&mastercard_fci(&pdol)),
        ok(&hex!("77 0A 82 02 38 00 94 04 08 01 03 01")),
        ok(&record_1),
        ok(&record_2),
        ok(&record_3),
    ]);
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys).with_terminal(DefaultTerminalData::default());
    session.init_card().unwrap();
    session.select_application(&AID).unwrap();
    let app = session.initiate_application_processing().unwrap();

    let aip = app.aip.unwrap();
    assert!(!aip.supports_sda());
    assert!(aip.supports_dda());
    assert_eq!(app.afl.len(), 1);
    assert_eq!(app.afl[0].sfi, 1);
    assert_eq!(app.afl[0].records(), 1..=3);
    assert_eq!(app.afl[0].oda_range(), 1..=1);
    assert_eq!(app.records.len(), 3);
    assert_eq!(app.pan().as_deref(), Some("5413330089010434"));
    assert_eq!(app.oda_data, record_1[2..]);
    assert!(!app.is_failed());
    assert_eq!(session.state(), SessionState::RecordsRead);

    assert!(matches!(
        session.initiate_application_processing(),
        Err(EmvError::InvalidState(_))
    ));
    drop(session);

    assert_eq!(card.sent[4], hex!("80 A8 00 00 04 83 02 08 40 00"));
    assert_eq!(card.sent[7], hex!("00 B2 03 0C 00"));
}

#[test]
fn test_record_failure_marks_application_failed() {
    let mut responses = pse_with(&[
        application_template(&AID, "MASTERCARD", Some(1)),
        application_template(&VISA, "VISA", Some(2)),
    ]);
    responses.extend([
        ok(&mastercard_fci(&[])),
        ok(&hex!("80 06 38 00 08 01 02 00")),
        ok(&tlv(&[0x70], &tlv(&[0x5A], &PAN))),
        status(0x6A83),
        ok(&fci(&VISA, &tlv(&[0x50], b"VISA"))),
    ]);
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    session.select_application(&AID).unwrap();

    match session.initiate_application_processing() {
        Err(EmvError::CardProtocol { command, status }) => {
            assert_eq!(command, "READ RECORD");
            assert_eq!(status, StatusWord::RECORD_NOT_FOUND);
        }
        other => panic!("unexpected {:?}", other.map(|a| a.aid.clone())),
    }

    let failed = session.card().unwrap().application(&AID).unwrap();
    assert!(failed.is_failed());
    assert_eq!(failed.records.len(), 1);

    // the session carries on with another application
    assert_eq!(session.select_application(&VISA).unwrap().name(), "VISA");
}

#[test]
fn test_read_additional_data() {
    let log_entry = tlv(&[0xBF, 0x0C], &tlv(&[0x9F, 0x4D], &hex!("0B 02")));
    let mut responses = pse_with(&[application_template(&AID, "MASTERCARD", None)]);
    responses.extend([
        ok(&mastercard_fci(&log_entry)),
        ok(&hex!("9F 36 02 00 2A")),
        status(0x6A88),
        ok(&hex!("9F 17 01 03")),
        ok(&hex!("9A 03 26 10 19 9F 02 06 00 00 00 00 10 00")),
        ok(&hex!("9A 03 26 10 18 9F 02 06 00 00 00 00 25 00")),
    ]);
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    session.select_application(&AID).unwrap();
    let app = session.read_additional_data().unwrap();

    assert_eq!(app.atc, Some(42));
    assert_eq!(app.last_online_atc, None);
    assert_eq!(app.pin_try_counter, Some(3));
    assert_eq!(app.transaction_log.len(), 2);
    drop(session);

    assert_eq!(card.sent[4], hex!("80 CA 9F 36 00"));
    assert_eq!(card.sent[7], hex!("00 B2 01 5C 00"));
    assert_eq!(card.sent[8], hex!("00 B2 02 5C 00"));
}

#[test]
fn test_oversized_counters_are_ignored() {
    let mut responses = pse_with(&[application_template(&AID, "MASTERCARD", None)]);
    responses.extend([
        ok(&mastercard_fci(&[])),
        ok(&hex!("9F 36 03 01 00 00")),
        ok(&hex!("9F 13 02 00 07")),
        ok(&hex!("9F 17 02 01 00")),
    ]);
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    session.select_application(&AID).unwrap();
    let app = session.read_additional_data().unwrap();

    assert_eq!(app.atc, None);
    assert_eq!(app.last_online_atc, Some(7));
    assert_eq!(app.pin_try_counter, None);
}

#[test]
fn test_verify_pin_outcomes() {
    let mut responses = pse_with(&[application_template(&AID, "MASTERCARD", None)]);
    responses.extend([ok(&mastercard_fci(&[])), status(0x9000), status(0x63C2), status(0x6983)]);
    let mut card = MockCard::new(responses);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    session.select_application(&AID).unwrap();

    assert_eq!(session.verify_pin("1234", true).unwrap(), PinVerification::Verified);
    assert_eq!(
        session.verify_pin("0000", true).unwrap(),
        PinVerification::WrongPin { tries_remaining: 2 }
    );
    assert_eq!(session.verify_pin("0000", true).unwrap(), PinVerification::Blocked);
    assert!(matches!(session.verify_pin("1234", false), Err(EmvError::Unsupported(_))));
    assert!(matches!(session.verify_pin("12", true), Err(EmvError::InvalidInput(_))));
    drop(session);

    assert_eq!(card.sent[4], hex!("00 20 00 80 08 24 12 34 FF FF FF FF FF"));
    assert_eq!(card.remaining(), 0);
}

#[test]
fn test_get_challenge_and_close() {
    let mut card = MockCard::new([ok(&hex!("01 23 45 67 89 AB CD EF"))]);
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    assert_eq!(session.get_challenge().unwrap(), hex!("01 23 45 67 89 AB CD EF"));
    session.close(true).unwrap();
    assert_eq!(session.state(), SessionState::Done);
    drop(session);

    assert_eq!(card.sent[0], hex!("00 84 00 00 00"));
    assert_eq!(card.disconnected, Some(true));
}

#[test]
fn test_dump_lists_discovered_applications() {
    let mut card = MockCard::new(pse_with(&[application_template(&AID, "MASTERCARD", Some(1))]));
    let tags = TagRegistry::emv();
    let ca_keys = CaKeyStore::empty();

    let mut session = session(&mut card, &tags, &ca_keys);
    session.init_card().unwrap();
    let text = session.dump().unwrap().to_string();

    assert!(text.contains("Directory: PSE (SFI 1)"));
    assert!(text.contains("Application A0000000041010 (MASTERCARD)"));
    assert!(text.contains("Priority: 1"));
}
