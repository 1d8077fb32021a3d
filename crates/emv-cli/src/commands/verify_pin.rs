use emv_card::PinVerification;

use crate::error::CliError;

use super::Context;

/// Offline plaintext PIN verification
pub fn cmd_verify_pin(ctx: &Context, pin: &str) -> Result<(), CliError> {
    println!("EMV VERIFY - Offline Plaintext PIN\n");

    let transport = ctx.connect()?;
    let mut session = ctx.session(transport)?;
    ctx.process(&mut session)?;

    let result = session.verify_pin(pin, true)?;
    session.close(false)?;

    match result {
        PinVerification::Verified => println!("PIN verified ✓"),
        PinVerification::WrongPin { tries_remaining } => {
            println!("Wrong PIN ✗ ({} tries remaining)", tries_remaining)
        }
        PinVerification::Blocked => println!("PIN is blocked ✗"),
    }
    Ok(())
}
