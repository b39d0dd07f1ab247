//! Record persistence for the identity registries, the local bytecode/ABI
//! database and decoded output.
//!
//! [`RecordStore`] is the narrow contract the core needs: load every record
//! of a named set, upsert one record, or replace a whole set. [`SqliteStore`]
//! backs it with SQLite in WAL mode; [`MemoryStore`] keeps everything in
//! process.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use alloy::primitives::{Address, B256};
use eyre::{eyre, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Named record set holding peer identities.
pub const PEERS: &str = "peers";
/// Named record set holding token metadata.
pub const TOKENS: &str = "tokens";
/// Named record set holding the consolidated per-address view.
pub const ONES: &str = "ones";

/// Key-value persistence for JSON records grouped in named sets.
pub trait RecordStore: Send + Sync {
    /// Every `(key, record)` pair of `set`, ordered by key.
    fn load_all(&self, set: &str) -> Result<Vec<(String, serde_json::Value)>>;

    /// Inserts or overwrites the record stored under `key`.
    fn upsert(&self, set: &str, key: &str, record: &serde_json::Value) -> Result<()>;

    /// Atomically replaces the whole content of `set`.
    fn replace_all(&self, set: &str, records: &[(String, serde_json::Value)]) -> Result<()>;
}

/// Loads and deserializes every record of `set`.
///
/// Records that fail to deserialize are skipped with a warning.
pub fn load_typed<T: DeserializeOwned>(
    store: &dyn RecordStore,
    set: &str,
) -> Result<Vec<(String, T)>> {
    let rows = store.load_all(set)?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, body) in rows {
        match serde_json::from_value(body) {
            Ok(record) => out.push((key, record)),
            Err(e) => tracing::warn!(set, key = %key, error = %e, "skipping malformed record"),
        }
    }
    Ok(out)
}

/// Serializes and upserts one record.
pub fn upsert_typed<T: Serialize>(
    store: &dyn RecordStore,
    set: &str,
    key: &str,
    record: &T,
) -> Result<()> {
    let body = serde_json::to_value(record).wrap_err("failed to serialize record")?;
    store.upsert(set, key, &body)
}

/// A contract ABI remembered by deployed-bytecode hash.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredAbi {
    /// keccak256 of the deployed bytecode.
    pub code_hash: B256,
    /// Address the ABI was first learned for.
    pub address: Address,
    /// JSON ABI array.
    pub abi_json: String,
    /// Where the ABI came from (e.g. `"sourcify"`).
    pub source: String,
}

/// SQLite-backed store. The connection sits behind a mutex so the store can
/// be shared across tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).wrap_err_with(|| format!("failed to open {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| eyre!("sqlite connection mutex poisoned"))
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                set_name TEXT NOT NULL,
                record_key TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (set_name, record_key)
            );

            CREATE TABLE IF NOT EXISTS contract_abis (
                code_hash TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                abi_json TEXT NOT NULL,
                source TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decoded_transactions (
                block_number INTEGER NOT NULL,
                tx_index INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (block_number, tx_index)
            );
            ",
        )?;
        Ok(())
    }

    /// Looks up an ABI by deployed-bytecode hash.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn abi_by_code_hash(&self, code_hash: B256) -> Result<Option<StoredAbi>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT address, abi_json, source FROM contract_abis WHERE code_hash = ?",
                rusqlite::params![format!("{code_hash:#x}")],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((address, abi_json, source)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredAbi {
            code_hash,
            address: address
                .parse()
                .wrap_err_with(|| format!("malformed address in contract_abis: {address}"))?,
            abi_json,
            source,
        }))
    }

    /// Remembers an ABI for a bytecode hash. The first ABI stored for a hash wins.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    pub fn insert_abi(&self, abi: &StoredAbi) -> Result<()> {
        self.conn()?.execute(
            "
            INSERT OR IGNORE INTO contract_abis (code_hash, address, abi_json, source)
            VALUES (?, ?, ?, ?)
            ",
            rusqlite::params![
                format!("{:#x}", abi.code_hash),
                format!("{:#x}", abi.address),
                abi.abi_json,
                abi.source,
            ],
        )?;
        Ok(())
    }

    /// Batch insert decoded transactions for one block using a prepared statement.
    ///
    /// Rows are `(tx_index, tx_hash, body)`; re-decoding a block overwrites its rows.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn insert_decoded_txs(
        &self,
        block_number: u64,
        rows: &[(u64, B256, serde_json::Value)],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO decoded_transactions (block_number, tx_index, tx_hash, body)
                VALUES (?, ?, ?, ?)
                ",
            )?;
            for (tx_index, tx_hash, body) in rows {
                stmt.execute(rusqlite::params![
                    block_number,
                    tx_index,
                    format!("{tx_hash:#x}"),
                    body.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Number of decoded transactions stored for `block_number`.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn decoded_tx_count(&self, block_number: u64) -> Result<u64> {
        let count: u64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM decoded_transactions WHERE block_number = ?",
            rusqlite::params![block_number],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of records in each named set.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn set_sizes(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT set_name, COUNT(*) FROM records GROUP BY set_name ORDER BY set_name",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl RecordStore for SqliteStore {
    fn load_all(&self, set: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_key, body FROM records WHERE set_name = ? ORDER BY record_key",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![set], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, body)| {
                let value = serde_json::from_str(&body)
                    .wrap_err_with(|| format!("record {set}/{key} is not valid JSON"))?;
                Ok((key, value))
            })
            .collect()
    }

    fn upsert(&self, set: &str, key: &str, record: &serde_json::Value) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO records (set_name, record_key, body) VALUES (?, ?, ?)",
            rusqlite::params![set, key, record.to_string()],
        )?;
        Ok(())
    }

    fn replace_all(&self, set: &str, records: &[(String, serde_json::Value)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE set_name = ?",
            rusqlite::params![set],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO records (set_name, record_key, body) VALUES (?, ?, ?)",
            )?;
            for (key, body) in records {
                stmt.execute(rusqlite::params![set, key, body.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// In-process [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    sets: RwLock<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn load_all(&self, set: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let sets = self
            .sets
            .read()
            .map_err(|_| eyre!("memory store lock poisoned"))?;
        Ok(sets
            .get(set)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert(&self, set: &str, key: &str, record: &serde_json::Value) -> Result<()> {
        let mut sets = self
            .sets
            .write()
            .map_err(|_| eyre!("memory store lock poisoned"))?;
        sets.entry(set.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    fn replace_all(&self, set: &str, records: &[(String, serde_json::Value)]) -> Result<()> {
        let mut sets = self
            .sets
            .write()
            .map_err(|_| eyre!("memory store lock poisoned"))?;
        sets.insert(set.to_string(), records.iter().cloned().collect());
        Ok(())
    }
}
