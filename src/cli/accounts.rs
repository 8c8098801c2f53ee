use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::fmt::money_cents;
use crate::settings::db_path;

pub fn add(name: &str, institution: Option<&str>, currency: Option<&str>) -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    conn.execute(
        "INSERT INTO accounts (name, institution, currency) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, institution, currency.unwrap_or("BRL")],
    )?;
    println!("Added account: {name}");
    Ok(())
}

pub fn list() -> anyhow::Result<()> {
    let conn = get_connection(&db_path())?;
    let mut stmt = conn.prepare(
        "SELECT id, name, institution, currency, current_balance_cents FROM accounts ORDER BY name",
    )?;
    let rows: Vec<(i64, String, Option<String>, String, i64)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Institution", "Currency", "Balance"]);
    for (id, name, institution, currency, balance) in rows {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(name),
            Cell::new(institution.unwrap_or_default()),
            Cell::new(currency),
            Cell::new(money_cents(balance)),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}
