use crate::error::CliError;

use super::Context;

pub fn cmd_get_challenge(ctx: &Context) -> Result<(), CliError> {
    println!("EMV GET CHALLENGE - Request Random Number\n");

    let transport = ctx.connect()?;
    let mut session = ctx.session(transport)?;

    println!("\n=== Selecting EMV Application ===\n");
    let aid = ctx.select(&mut session)?;
    println!("Application {} selected", hex::encode_upper(&aid));

    println!("\n=== Sending GET CHALLENGE ===\n");
    let random_bytes = session.get_challenge()?;
    println!(
        "Random bytes ({} bytes): {}",
        random_bytes.len(),
        hex::encode_upper(&random_bytes)
    );

    session.close(false)?;
    println!("\nGET CHALLENGE completed successfully!");
    Ok(())
}
