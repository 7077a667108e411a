use std::sync::{Mutex, MutexGuard};

use alloy::primitives::TxHash;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::PaymentError;
use crate::intent::{IntentId, IntentState, PaymentIntent};

/// Optional column updates that ride along with a state transition so the
/// hash or reason lands atomically with the state it belongs to.
#[derive(Debug, Clone, Default)]
pub struct StateChanges {
    pub chain_tx_hash: Option<TxHash>,
    pub swap_tx_hash: Option<TxHash>,
    pub settlement_tx_hash: Option<TxHash>,
    pub failure_reason: Option<String>,
}

/// Durable home of payment intents.
///
/// The `advance` compare-and-swap is the only cross-process mutual
/// exclusion point in the system: whichever process updates the row from
/// the expected state first wins, everyone else gets
/// [`PaymentError::Conflict`].
///
/// Amounts are stored as decimal text because they can exceed SQLite's
/// 64-bit integer range.
pub struct SettlementStore {
    conn: Mutex<Connection>,
}

impl SettlementStore {
    /// Open (or create) the store at `path`. `":memory:"` works for tests.
    pub fn open(path: &str) -> Result<Self, PaymentError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS payment_intents (
                id TEXT PRIMARY KEY,
                payer_address TEXT NOT NULL,
                token TEXT NOT NULL,
                amount TEXT NOT NULL,
                settlement_token TEXT NOT NULL,
                state TEXT NOT NULL,
                chain_tx_hash TEXT,
                swap_tx_hash TEXT,
                settlement_tx_hash TEXT,
                failure_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_payment_intents_state
                ON payment_intents(state);
            PRAGMA journal_mode=WAL;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned mutex only means another thread panicked mid-query; the
    /// connection itself is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("settlement store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn insert(&self, intent: &PaymentIntent) -> Result<(), PaymentError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO payment_intents (
                id, payer_address, token, amount, settlement_token, state,
                chain_tx_hash, swap_tx_hash, settlement_tx_hash, failure_reason,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                intent.id.to_string(),
                intent.payer_address.to_string(),
                intent.token,
                intent.amount.to_string(),
                intent.settlement_token,
                intent.state.as_str(),
                intent.chain_tx_hash.map(|h| h.to_string()),
                intent.swap_tx_hash.map(|h| h.to_string()),
                intent.settlement_tx_hash.map(|h| h.to_string()),
                intent.failure_reason,
                intent.created_at,
                intent.updated_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PaymentError::Validation(format!("intent id already exists: {}", intent.id))
            }
            other => PaymentError::Store(other),
        })?;
        Ok(())
    }

    pub fn get(&self, id: &IntentId) -> Result<Option<PaymentIntent>, PaymentError> {
        let conn = self.conn();
        Self::get_with(&conn, id)
    }

    // Reads with an already-held connection, so `advance` can re-read after
    // a failed CAS without re-locking the mutex.
    fn get_with(conn: &Connection, id: &IntentId) -> Result<Option<PaymentIntent>, PaymentError> {
        let intent = conn
            .query_row(
                "SELECT id, payer_address, token, amount, settlement_token, state,
                        chain_tx_hash, swap_tx_hash, settlement_tx_hash, failure_reason,
                        created_at, updated_at
                 FROM payment_intents WHERE id = ?1",
                params![id.to_string()],
                row_to_intent,
            )
            .optional()?;
        Ok(intent)
    }

    /// Atomically move an intent from `from` to `to`, applying `changes`
    /// in the same statement.
    ///
    /// The update is conditioned on the row still being in `from`; zero
    /// affected rows means either the id is unknown
    /// ([`PaymentError::NotFound`]) or another process advanced the intent
    /// first ([`PaymentError::Conflict`]). Returns the updated row.
    pub fn advance(
        &self,
        id: &IntentId,
        from: IntentState,
        to: IntentState,
        changes: &StateChanges,
    ) -> Result<PaymentIntent, PaymentError> {
        if !from.can_advance_to(to) {
            return Err(PaymentError::IllegalTransition { from, to });
        }

        let conn = self.conn();
        let now = chrono::Utc::now().timestamp();
        let rows_affected = conn.execute(
            "UPDATE payment_intents
             SET state = ?1,
                 updated_at = ?2,
                 chain_tx_hash = COALESCE(?3, chain_tx_hash),
                 swap_tx_hash = COALESCE(?4, swap_tx_hash),
                 settlement_tx_hash = COALESCE(?5, settlement_tx_hash),
                 failure_reason = COALESCE(?6, failure_reason)
             WHERE id = ?7 AND state = ?8",
            params![
                to.as_str(),
                now,
                changes.chain_tx_hash.map(|h| h.to_string()),
                changes.swap_tx_hash.map(|h| h.to_string()),
                changes.settlement_tx_hash.map(|h| h.to_string()),
                changes.failure_reason,
                id.to_string(),
                from.as_str(),
            ],
        )?;

        if rows_affected == 0 {
            return match Self::get_with(&conn, id)? {
                Some(_) => Err(PaymentError::Conflict),
                None => Err(PaymentError::NotFound(*id)),
            };
        }
        Self::get_with(&conn, id)?.ok_or(PaymentError::NotFound(*id))
    }

    /// Intents that still need driving, oldest activity first. Feeds the
    /// reconciliation sweep.
    pub fn list_unfinished(&self, limit: u32) -> Result<Vec<PaymentIntent>, PaymentError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, payer_address, token, amount, settlement_token, state,
                    chain_tx_hash, swap_tx_hash, settlement_tx_hash, failure_reason,
                    created_at, updated_at
             FROM payment_intents
             WHERE state NOT IN ('settled', 'failed')
             ORDER BY updated_at ASC
             LIMIT ?1",
        )?;
        let intents = stmt
            .query_map(params![limit], row_to_intent)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(intents)
    }

    pub fn list_in_state(
        &self,
        state: IntentState,
        limit: u32,
    ) -> Result<Vec<PaymentIntent>, PaymentError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, payer_address, token, amount, settlement_token, state,
                    chain_tx_hash, swap_tx_hash, settlement_tx_hash, failure_reason,
                    created_at, updated_at
             FROM payment_intents
             WHERE state = ?1
             ORDER BY updated_at ASC
             LIMIT ?2",
        )?;
        let intents = stmt
            .query_map(params![state.as_str(), limit], row_to_intent)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(intents)
    }
}

fn row_to_intent(row: &Row<'_>) -> rusqlite::Result<PaymentIntent> {
    let id: String = row.get(0)?;
    let payer: String = row.get(1)?;
    let amount: String = row.get(3)?;
    let state: String = row.get(5)?;
    let chain_tx: Option<String> = row.get(6)?;
    let swap_tx: Option<String> = row.get(7)?;
    let settlement_tx: Option<String> = row.get(8)?;
    Ok(PaymentIntent {
        id: parse_text(0, &id)?,
        payer_address: parse_text(1, &payer)?,
        token: row.get(2)?,
        amount: parse_text(3, &amount)?,
        settlement_token: row.get(4)?,
        state: parse_text(5, &state)?,
        chain_tx_hash: chain_tx.as_deref().map(|s| parse_text(6, s)).transpose()?,
        swap_tx_hash: swap_tx.as_deref().map(|s| parse_text(7, s)).transpose()?,
        settlement_tx_hash: settlement_tx
            .as_deref()
            .map(|s| parse_text(8, s))
            .transpose()?,
        failure_reason: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn parse_text<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
