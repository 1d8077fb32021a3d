use crate::error::CliError;
use crate::formatters::FormatMode;

use super::dump_all_tags::dump_all_tags;
use super::Context;

/// Read the selected application completely and print everything parsed
pub fn cmd_dump(ctx: &Context) -> Result<(), CliError> {
    println!("EMV Card Dump\n");

    let transport = ctx.connect()?;
    let mut session = ctx.session(transport)?;

    // a failed application is still worth dumping
    if let Err(e) = ctx.process(&mut session) {
        eprintln!("Application processing stopped: {}", e);
    }
    if let Err(e) = session.read_additional_data() {
        eprintln!("Failed to read additional data: {}", e);
    }

    if let Some(dump) = session.dump() {
        println!("{}", dump);
    }

    if ctx.format == FormatMode::Raw {
        if let Some(app) = session.card().and_then(|card| card.selected_application()) {
            println!("=== All TLV tags from all records ===\n");
            for record in &app.records {
                println!("SFI {} record {}:", record.sfi, record.number);
                for line in dump_all_tags(&ctx.tags, &record.data, 1) {
                    println!("{}", line);
                }
                println!();
            }
        }
    }

    session.close(false)?;
    println!("=== Dump Complete ===");
    Ok(())
}
