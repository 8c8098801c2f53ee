use rusqlite::{params, Connection};

use crate::db::now;
use crate::error::Result;
use crate::models::{Account, TransactionType};

pub fn find_account(conn: &Connection, account_id: i64) -> Result<Option<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, institution, currency, current_balance_cents \
         FROM accounts WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map([account_id], account_from_sql)?;
    Ok(rows.next().transpose()?)
}

pub fn find_account_by_name(conn: &Connection, name: &str) -> Result<Option<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, institution, currency, current_balance_cents \
         FROM accounts WHERE name = ?1",
    )?;
    let mut rows = stmt.query_map([name], account_from_sql)?;
    Ok(rows.next().transpose()?)
}

fn account_from_sql(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        institution: row.get(2)?,
        currency: row.get(3)?,
        current_balance_cents: row.get(4)?,
    })
}

/// Look up a committed transaction with this fingerprint for the
/// account, bounded to events at or after `since` when given.
pub fn find_by_checksum(
    conn: &Connection,
    account_id: i64,
    checksum: &str,
    since: Option<i64>,
) -> Result<Option<i64>> {
    let mut sql =
        "SELECT id FROM transactions WHERE account_id = ?1 AND checksum = ?2".to_string();
    if since.is_some() {
        sql.push_str(" AND occurred_at >= ?3");
    }
    sql.push_str(" LIMIT 1");

    let mut stmt = conn.prepare(&sql)?;
    let found = match since {
        Some(ts) => stmt
            .query_map(params![account_id, checksum, ts], |row| row.get::<_, i64>(0))?
            .next()
            .transpose()?,
        None => stmt
            .query_map(params![account_id, checksum], |row| row.get::<_, i64>(0))?
            .next()
            .transpose()?,
    };
    Ok(found)
}

/// Fields for one ledger insert built by the commit phase.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub cost_center_id: Option<i64>,
    pub transaction_type: TransactionType,
    pub description: String,
    pub amount_cents: i64,
    pub occurred_at: i64,
    pub reference: Option<String>,
    pub source: &'static str,
    pub source_payload: Option<String>,
    pub metadata: Option<String>,
    pub import_row_id: Option<i64>,
    pub checksum: Option<String>,
}

pub fn create_transaction(conn: &Connection, txn: &NewTransaction) -> Result<i64> {
    let ts = now();
    conn.execute(
        "INSERT INTO transactions (account_id, cost_center_id, transaction_type, description, \
                amount_cents, occurred_at, reference, source, source_payload, metadata, \
                import_row_id, checksum, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            txn.account_id,
            txn.cost_center_id,
            txn.transaction_type.as_str(),
            txn.description,
            txn.amount_cents,
            txn.occurred_at,
            txn.reference,
            txn.source,
            txn.source_payload,
            txn.metadata,
            txn.import_row_id,
            txn.checksum,
            ts
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Rebuild the account's running balance: walk transactions in
/// (occurred_at, id) order, fill balance_after cumulatively, and land
/// the final figure on the account. One SQL transaction end to end.
pub fn recalculate_balance(conn: &Connection, account_id: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    let entries: Vec<(i64, i64, String)> = {
        let mut stmt = tx.prepare(
            "SELECT id, amount_cents, transaction_type FROM transactions \
             WHERE account_id = ?1 ORDER BY occurred_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([account_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut balance = 0i64;
    {
        let mut update = tx.prepare("UPDATE transactions SET balance_after = ?1 WHERE id = ?2")?;
        for (id, amount_cents, transaction_type) in &entries {
            if transaction_type == "credit" {
                balance += amount_cents;
            } else {
                balance -= amount_cents;
            }
            update.execute(params![balance, id])?;
        }
    }

    tx.execute(
        "UPDATE accounts SET current_balance_cents = ?1 WHERE id = ?2",
        params![balance, account_id],
    )?;
    tx.commit()?;
    Ok(())
}
