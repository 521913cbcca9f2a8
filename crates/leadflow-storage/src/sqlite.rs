use crate::{BulkInsertError, LeadFilter, RecordStore, StorageError};
use chrono::{DateTime, SecondsFormat, Utc};
use leadflow_core::{Account, ArchivedLead, Batch, Lead, LeadStatus, Role, RowPayload};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub const LEAD_SCHEMA_VERSION: i64 = 2;

// Keeps IN (...) lists well under SQLite's bound parameter limit.
const MAX_IN_PARAMS: usize = 500;
// Leads per insert transaction; `BulkInsertError::inserted` counts whole chunks.
const LEAD_INSERT_CHUNK: usize = 500;

const ACCOUNT_COLUMNS: &str = "account_id, username, email, role, created_at";
const BATCH_COLUMNS: &str = "batch_id, name, owner_id, total_leads, created_at, updated_at";
const LEAD_COLUMNS: &str = "lead_id, batch_id, row_index, assigned_to, imported_by, status, \
     payload_json, assigned_at, created_at, updated_at";
const ARCHIVE_COLUMNS: &str =
    "archive_id, original_lead_id, payload_json, source_batch_name, forwarded_by, forwarded_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > LEAD_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: LEAD_SCHEMA_VERSION,
            });
        }

        let conn = self.conn()?;
        if current < 1 {
            let sql = include_str!("../migrations/0001_lead_schema.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_lead_archive.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 2", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let exists = conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

impl RecordStore for SqliteStore {
    fn insert_account(&self, account: &Account) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "
            INSERT INTO accounts (account_id, username, email, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                account.id,
                account.username,
                account.email,
                account.role.as_str(),
                format_timestamp(account.created_at),
            ],
        )?;
        Ok(())
    }

    fn account(&self, account_id: &str) -> Result<Option<Account>, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?1");
        Ok(conn
            .query_row(&sql, [account_id], account_from_row)
            .optional()?)
    }

    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1");
        Ok(conn.query_row(&sql, [email], account_from_row).optional()?)
    }

    fn account_by_username(&self, username: &str) -> Result<Option<Account>, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?1");
        Ok(conn
            .query_row(&sql, [username], account_from_row)
            .optional()?)
    }

    fn accounts(&self, role: Option<Role>) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            WHERE (?1 IS NULL OR role = ?1)
            ORDER BY seq ASC
            "
        );
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map([role.map(|role| role.as_str())], account_from_row)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    fn delete_account(&self, account_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute("DELETE FROM accounts WHERE account_id = ?1", [account_id])?;
        Ok(changes > 0)
    }

    fn insert_batch(&self, batch: &Batch) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "
            INSERT INTO batches (batch_id, name, owner_id, total_leads, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                batch.id,
                batch.name,
                batch.owner,
                batch.total_leads as i64,
                format_timestamp(batch.created_at),
                format_timestamp(batch.updated_at),
            ],
        )?;
        for agent_id in &batch.roster {
            tx.execute(
                "INSERT OR IGNORE INTO batch_roster (batch_id, agent_id) VALUES (?1, ?2)",
                params![batch.id, agent_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn batch(&self, batch_id: &str) -> Result<Option<Batch>, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = ?1");
        let batch = conn.query_row(&sql, [batch_id], batch_from_row).optional()?;
        match batch {
            Some(mut batch) => {
                batch.roster = load_roster(&conn, &batch.id)?;
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }

    fn batches(&self) -> Result<Vec<Batch>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "
            SELECT {BATCH_COLUMNS}
            FROM batches
            ORDER BY created_at DESC, rowid DESC
            "
        );
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map([], batch_from_row)?;

        let mut batches = Vec::new();
        for row in rows {
            let mut batch = row?;
            batch.roster = load_roster(&conn, &batch.id)?;
            batches.push(batch);
        }
        Ok(batches)
    }

    fn batches_for_agent(&self, agent_id: &str) -> Result<Vec<Batch>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "
            SELECT {BATCH_COLUMNS}
            FROM batches
            WHERE batch_id IN (SELECT batch_id FROM batch_roster WHERE agent_id = ?1)
            ORDER BY created_at DESC, rowid DESC
            "
        );
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map([agent_id], batch_from_row)?;

        let mut batches = Vec::new();
        for row in rows {
            let mut batch = row?;
            batch.roster = load_roster(&conn, &batch.id)?;
            batches.push(batch);
        }
        Ok(batches)
    }

    fn add_to_roster(
        &self,
        batch_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let touched = touch_batch(&conn, batch_id, now)?;
        if !touched {
            return Ok(false);
        }
        conn.execute(
            "INSERT OR IGNORE INTO batch_roster (batch_id, agent_id) VALUES (?1, ?2)",
            params![batch_id, agent_id],
        )?;
        Ok(true)
    }

    fn remove_from_roster(
        &self,
        batch_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "DELETE FROM batch_roster WHERE batch_id = ?1 AND agent_id = ?2",
            params![batch_id, agent_id],
        )?;
        if changes > 0 {
            touch_batch(&conn, batch_id, now)?;
        }
        Ok(changes > 0)
    }

    fn replace_roster(
        &self,
        batch_id: &str,
        roster: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !touch_batch(&tx, batch_id, now)? {
            return Ok(false);
        }
        tx.execute("DELETE FROM batch_roster WHERE batch_id = ?1", [batch_id])?;
        for agent_id in roster {
            tx.execute(
                "INSERT OR IGNORE INTO batch_roster (batch_id, agent_id) VALUES (?1, ?2)",
                params![batch_id, agent_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn insert_leads(&self, leads: &[Lead]) -> Result<usize, BulkInsertError> {
        let mut inserted = 0usize;
        for chunk in leads.chunks(LEAD_INSERT_CHUNK) {
            let failed = |source: StorageError| BulkInsertError { inserted, source };
            // lock per chunk so other callers can interleave
            let mut conn = self.conn().map_err(failed)?;
            let tx = conn
                .transaction()
                .map_err(|err| failed(StorageError::from(err)))?;
            for lead in chunk {
                insert_lead(&tx, lead).map_err(failed)?;
            }
            tx.commit().map_err(|err| failed(StorageError::from(err)))?;
            inserted += chunk.len();
        }
        Ok(inserted)
    }

    fn lead(&self, lead_id: &str) -> Result<Option<Lead>, StorageError> {
        let conn = self.conn()?;
        query_lead(&conn, lead_id)
    }

    fn leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "
            SELECT {LEAD_COLUMNS}
            FROM leads
            WHERE (?1 IS NULL OR batch_id = ?1)
              AND (?2 IS NULL OR assigned_to = ?2)
              AND status != 'flushed'
            ORDER BY batch_id ASC, row_index ASC
            "
        );
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map(
            params![filter.batch_id, filter.assigned_to],
            lead_from_row,
        )?;

        let mut leads = Vec::new();
        for row in rows {
            leads.push(row?);
        }
        Ok(leads)
    }

    fn count_leads(&self, filter: &LeadFilter) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "
            SELECT COUNT(*)
            FROM leads
            WHERE (?1 IS NULL OR batch_id = ?1)
              AND (?2 IS NULL OR assigned_to = ?2)
              AND status != 'flushed'
            ",
            params![filter.batch_id, filter.assigned_to],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn owned_leads(&self, lead_ids: &[String], agent_id: &str) -> Result<Vec<Lead>, StorageError> {
        let conn = self.conn()?;
        let mut leads = Vec::new();
        for chunk in lead_ids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "
                SELECT {LEAD_COLUMNS}
                FROM leads
                WHERE assigned_to = ?1 AND lead_id IN ({})
                ORDER BY batch_id ASC, row_index ASC
                ",
                placeholders(chunk.len(), 2)
            );
            let mut statement = conn.prepare(&sql)?;
            let values = std::iter::once(agent_id).chain(chunk.iter().map(String::as_str));
            let rows = statement.query_map(params_from_iter(values), lead_from_row)?;
            for row in rows {
                leads.push(row?);
            }
        }
        Ok(leads)
    }

    fn update_lead_status(
        &self,
        lead_id: &str,
        agent_id: &str,
        status: LeadStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "
            UPDATE leads
            SET status = ?1, updated_at = ?2
            WHERE lead_id = ?3 AND assigned_to = ?4 AND status != 'flushed'
            ",
            params![status.as_str(), format_timestamp(now), lead_id, agent_id],
        )?;
        if changes == 0 {
            return Ok(None);
        }
        query_lead(&conn, lead_id)
    }

    fn reassign_leads(
        &self,
        batch_id: &str,
        from_agent: &str,
        to_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let now = format_timestamp(now);
        let changes = conn.execute(
            "
            UPDATE leads
            SET assigned_to = ?1, assigned_at = ?2, updated_at = ?2
            WHERE batch_id = ?3 AND assigned_to = ?4 AND status != 'flushed'
            ",
            params![to_agent, now, batch_id, from_agent],
        )?;
        Ok(changes as u64)
    }

    fn mark_flushed(&self, lead_ids: &[String], now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = format_timestamp(now);
        let mut changed = 0u64;
        for chunk in lead_ids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "UPDATE leads SET status = 'flushed', updated_at = ?1 WHERE lead_id IN ({})",
                placeholders(chunk.len(), 2)
            );
            let values = std::iter::once(now.as_str()).chain(chunk.iter().map(String::as_str));
            changed += tx.execute(&sql, params_from_iter(values))? as u64;
        }
        tx.commit()?;
        Ok(changed)
    }

    fn delete_leads(&self, lead_ids: &[String]) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0u64;
        for chunk in lead_ids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "DELETE FROM leads WHERE lead_id IN ({})",
                placeholders(chunk.len(), 1)
            );
            deleted += tx.execute(&sql, params_from_iter(chunk.iter()))? as u64;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn agents_holding_batch(&self, batch_id: &str) -> Result<BTreeSet<String>, StorageError> {
        let conn = self.conn()?;
        let mut statement =
            conn.prepare(
            "SELECT DISTINCT assigned_to FROM leads WHERE batch_id = ?1 AND status != 'flushed'",
        )?;
        let rows = statement.query_map([batch_id], |row| row.get::<_, String>(0))?;

        let mut agents = BTreeSet::new();
        for row in rows {
            agents.insert(row?);
        }
        Ok(agents)
    }

    fn insert_archived(&self, entries: &[ArchivedLead]) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0u64;
        for entry in entries {
            let payload_json = serde_json::to_string(&entry.payload)
                .map_err(|err| StorageError::Serialization(err.to_string()))?;
            tx.execute(
                "
                INSERT INTO archived_leads (
                    archive_id,
                    original_lead_id,
                    payload_json,
                    source_batch_name,
                    forwarded_by,
                    forwarded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    entry.id,
                    entry.original_lead_id,
                    payload_json,
                    entry.source_batch_name,
                    entry.forwarded_by,
                    format_timestamp(entry.forwarded_at),
                ],
            )?;
            inserted += 1;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn archived_leads(&self) -> Result<Vec<ArchivedLead>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "
            SELECT {ARCHIVE_COLUMNS}
            FROM archived_leads
            ORDER BY forwarded_at DESC, rowid DESC
            "
        );
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map([], archived_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn archive_count(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM archived_leads", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    fn purge_archive(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM archived_leads", [])?;
        Ok(deleted as u64)
    }
}

fn insert_lead(conn: &Connection, lead: &Lead) -> Result<(), StorageError> {
    let payload_json = serde_json::to_string(&lead.payload)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    conn.execute(
        "
        INSERT INTO leads (
            lead_id,
            batch_id,
            row_index,
            assigned_to,
            imported_by,
            status,
            payload_json,
            assigned_at,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ",
        params![
            lead.id,
            lead.batch_id,
            lead.row_index as i64,
            lead.assigned_to,
            lead.imported_by,
            lead.status.as_str(),
            payload_json,
            format_timestamp(lead.assigned_at),
            format_timestamp(lead.created_at),
            format_timestamp(lead.updated_at),
        ],
    )?;
    Ok(())
}

fn query_lead(conn: &Connection, lead_id: &str) -> Result<Option<Lead>, StorageError> {
    let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE lead_id = ?1");
    Ok(conn.query_row(&sql, [lead_id], lead_from_row).optional()?)
}

fn touch_batch(conn: &Connection, batch_id: &str, now: DateTime<Utc>) -> Result<bool, StorageError> {
    let changes = conn.execute(
        "UPDATE batches SET updated_at = ?1 WHERE batch_id = ?2",
        params![format_timestamp(now), batch_id],
    )?;
    Ok(changes > 0)
}

fn load_roster(conn: &Connection, batch_id: &str) -> Result<BTreeSet<String>, StorageError> {
    let mut statement = conn.prepare("SELECT agent_id FROM batch_roster WHERE batch_id = ?1")?;
    let rows = statement.query_map([batch_id], |row| row.get::<_, String>(0))?;

    let mut roster = BTreeSet::new();
    for row in rows {
        roster.insert(row?);
    }
    Ok(roster)
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let role_raw: String = row.get(3)?;
    let role = role_raw
        .parse::<Role>()
        .map_err(|err| invalid_column(3, err))?;
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        role,
        created_at: timestamp_column(row, 4)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        name: row.get(1)?,
        owner: row.get(2)?,
        total_leads: row.get::<_, i64>(3)? as u64,
        roster: BTreeSet::new(),
        created_at: timestamp_column(row, 4)?,
        updated_at: timestamp_column(row, 5)?,
    })
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    let status_raw: String = row.get(5)?;
    let status = status_raw
        .parse::<LeadStatus>()
        .map_err(|err| invalid_column(5, err))?;
    Ok(Lead {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        row_index: row.get::<_, i64>(2)? as u64,
        assigned_to: row.get(3)?,
        imported_by: row.get(4)?,
        status,
        payload: payload_column(row, 6)?,
        assigned_at: timestamp_column(row, 7)?,
        created_at: timestamp_column(row, 8)?,
        updated_at: timestamp_column(row, 9)?,
    })
}

fn archived_from_row(row: &Row<'_>) -> rusqlite::Result<ArchivedLead> {
    Ok(ArchivedLead {
        id: row.get(0)?,
        original_lead_id: row.get(1)?,
        payload: payload_column(row, 2)?,
        source_batch_name: row.get(3)?,
        forwarded_by: row.get(4)?,
        forwarded_at: timestamp_column(row, 5)?,
    })
}

fn payload_column(row: &Row<'_>, index: usize) -> rusqlite::Result<RowPayload> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(row.get::<_, String>(index)?).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
    })
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// Fixed-width so stored timestamps sort lexicographically.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
