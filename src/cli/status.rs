use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::fmt::batch_status;
use crate::settings::db_path;
use crate::store;

pub fn run() -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;

    let summary = store::batch_status_summary(&conn)?;
    if summary.is_empty() {
        println!("No import batches yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Status", "Batches"]);
    for (status, count) in &summary {
        table.add_row(vec![Cell::new(status), Cell::new(count)]);
    }
    println!("Batches by status\n{table}");

    let recent = store::recent_batches(&conn, 5)?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Status", "Total", "Valid", "Imported"]);
    for batch in &recent {
        table.add_row(vec![
            Cell::new(batch.id),
            Cell::new(&batch.filename),
            Cell::new(batch_status(batch.status)),
            Cell::new(batch.total_rows),
            Cell::new(batch.valid_rows),
            Cell::new(batch.imported_rows),
        ]);
    }
    println!("\nRecent batches\n{table}");
    Ok(())
}
