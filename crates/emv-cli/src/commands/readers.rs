use emv_card::CardReader;

use crate::error::CliError;

pub fn cmd_readers() -> Result<(), CliError> {
    let readers = CardReader::new()?.list_readers()?;

    if readers.is_empty() {
        println!("No card readers found");
        return Ok(());
    }

    println!("Found {} reader(s):\n", readers.len());
    for (i, name) in readers.iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    Ok(())
}
