use anyhow::Context;

use crate::db::get_connection;
use crate::review;
use crate::settings::db_path;

pub fn import(batch_id: i64, rows: Option<&str>, override_duplicates: bool) -> anyhow::Result<()> {
    let row_ids = rows.map(parse_row_ids).transpose()?;
    let conn = get_connection(&db_path())?;

    let stats = review::import_rows(&conn, batch_id, row_ids.as_deref(), override_duplicates)?;
    println!(
        "{} imported, {} errors ({} duplicates)",
        stats.imported, stats.errors, stats.duplicates
    );
    Ok(())
}

pub fn skip(batch_id: i64, row_id: i64, reason: Option<&str>) -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    review::skip_row(&conn, batch_id, row_id, reason)?;
    println!("Row {row_id} skipped");
    Ok(())
}

fn parse_row_ids(raw: &str) -> anyhow::Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("Invalid row id: {part}"))
        })
        .collect()
}
