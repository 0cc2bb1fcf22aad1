use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::logging;
use crate::model::ExportedTicket;
use crate::store::Store;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed reading ticket store: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("failed writing export: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed encoding ticket: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes one JSON object per ticket, one per line.
pub fn write_tickets_jsonl<W: Write>(
    tickets: &[ExportedTicket],
    mut writer: W,
) -> Result<usize, ExportError> {
    for ticket in tickets {
        serde_json::to_writer(&mut writer, ticket)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(tickets.len())
}

/// Export mode: reads the store, never the API.
pub fn export_store(store: &Store, path: &Path) -> Result<usize, ExportError> {
    let tickets = store.export_tickets()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    let written = write_tickets_jsonl(&tickets, writer)?;
    logging::info(format!(
        "exported {} ticket(s) to {}",
        written,
        path.display()
    ));
    Ok(written)
}
