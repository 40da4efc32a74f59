use crate::error::CliError;
use model::records::batch::Batch;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// One line per settled batch, for piping into other tools.
pub fn print_batch(batch: &Batch) -> Result<(), CliError> {
    let json = serde_json::to_string(batch)?;
    println!("{json}");
    Ok(())
}
