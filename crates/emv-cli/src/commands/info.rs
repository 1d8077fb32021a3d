use emv_card::EmvError;

use crate::error::CliError;

use super::card_info::CardInfoData;
use super::info_formatter::format_card_info;
use super::Context;

pub fn cmd_info(ctx: &Context) -> Result<(), CliError> {
    let transport = ctx.connect()?;
    let mut session = ctx.session(transport)?;
    ctx.process(&mut session)?;
    if let Err(e) = session.read_additional_data() {
        eprintln!("Failed to read counters: {}", e);
    }
    session.close(false)?;

    let mut card = session
        .into_card()
        .ok_or(EmvError::InvalidState("card not initialised"))?;
    let app = card
        .selected_application_mut()
        .ok_or(EmvError::InvalidState("no application selected"))?;
    let verification_result = app.verify_certificates(&ctx.ca_keys);

    let info = CardInfoData {
        card,
        verification_result,
    };
    format_card_info(&info, &ctx.tags, ctx.format);
    Ok(())
}
