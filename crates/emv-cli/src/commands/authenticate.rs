use emv_card::{AuthenticationOutcome, CertificateState, EmvError};

use crate::error::CliError;
use crate::formatters::check;

use super::Context;

pub fn cmd_authenticate(ctx: &Context) -> Result<(), CliError> {
    println!("EMV Dynamic Data Authentication (DDA)\n");

    let transport = ctx.connect()?;
    let mut session = ctx.session(transport)?;

    println!("\n=== Reading Card Data ===\n");
    let aid = ctx.process(&mut session)?;
    println!("Application {} processed", hex::encode_upper(&aid));

    println!("\n=== Sending INTERNAL AUTHENTICATE ===\n");
    let outcome = session.internal_authenticate()?;

    let app = session
        .card()
        .and_then(|card| card.selected_application())
        .ok_or(EmvError::InvalidState("no application selected"))?;

    println!("Authentication Method: {:?}", app.aip.map(|aip| aip.auth_method()));
    if let Some(cert) = &app.issuer_certificate {
        println!("Issuer Certificate Valid: {}", check(cert.state().is_valid()));
    }
    if let Some(cert) = &app.icc_certificate {
        println!("ICC Certificate Valid: {}", check(cert.state().is_valid()));
        if let CertificateState::Valid(key) = cert.state() {
            println!("ICC Public Key: {} bits", key.modulus.len() * 8);
        }
    }

    println!("\n=== Verifying DDA Signature ===\n");
    match outcome {
        AuthenticationOutcome::Valid(data) => {
            println!("DDA Signature Valid: {}", check(true));
            println!("ICC Dynamic Number: {}", hex::encode_upper(&data.icc_dynamic_number));
            println!("\n✓ Card successfully proved possession of ICC private key!");
        }
        AuthenticationOutcome::Invalid(reason) => {
            println!("DDA Signature Valid: {}", check(false));
            eprintln!("Error: {}", reason);
        }
        AuthenticationOutcome::NotAttempted(reason) => {
            println!("DDA not attempted: {}", reason);
        }
    }

    session.close(false)?;
    Ok(())
}
