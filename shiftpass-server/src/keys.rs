//! Employee public keys and their rotation.
//!
//! At time `now`, the keys that verify for an employee are the active key plus
//! superseded keys with `valid_until > now`, minus revoked keys. Re-pairing
//! supersedes the active key in the same transaction that inserts the new one;
//! with a zero grace period the old key stops verifying immediately.

use crate::error::{ServerError, ServerResult};
use ed25519_dalek::VerifyingKey;
use rusqlite::{params, Connection};
use uuid::Uuid;

pub struct KeyRegistry<'c> {
    conn: &'c Connection,
}

impl<'c> KeyRegistry<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Keys that verify for `employee_id` at `now`, newest first.
    pub fn verifying_keys(&self, employee_id: &Uuid, now: i64) -> ServerResult<Vec<VerifyingKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT public_key FROM employee_keys
             WHERE employee_id = ?1
               AND revoked_at IS NULL
               AND (superseded_at IS NULL OR valid_until > ?2)
             ORDER BY key_id DESC",
        )?;

        let rows = stmt
            .query_map(params![employee_id.to_string(), now], |row| {
                row.get::<_, Vec<u8>>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|bytes| {
                let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    ServerError::Internal(format!("Stored key for {} has bad length", employee_id))
                })?;
                VerifyingKey::from_bytes(&array).map_err(|e| {
                    ServerError::Internal(format!("Stored key for {} is invalid: {}", employee_id, e))
                })
            })
            .collect()
    }

    /// True when the employee has at least one key that verifies at `now`.
    pub fn is_paired(&self, employee_id: &Uuid, now: i64) -> ServerResult<bool> {
        Ok(!self.verifying_keys(employee_id, now)?.is_empty())
    }

    /// Make `key` the active key, superseding the current one.
    ///
    /// Superseded keys stay valid until `now + grace_secs`.
    pub fn activate(
        &self,
        employee_id: &Uuid,
        key: &VerifyingKey,
        now: i64,
        grace_secs: i64,
    ) -> ServerResult<()> {
        let key_bytes = key.to_bytes().to_vec();
        let known: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM employee_keys WHERE public_key = ?1)",
            [&key_bytes],
            |row| row.get(0),
        )?;
        if known {
            return Err(ServerError::validation("publicKey", "key already registered"));
        }

        let superseded = self.conn.execute(
            "UPDATE employee_keys SET superseded_at = ?1, valid_until = ?2
             WHERE employee_id = ?3 AND superseded_at IS NULL AND revoked_at IS NULL",
            params![now, now + grace_secs.max(0), employee_id.to_string()],
        )?;
        self.conn.execute(
            "INSERT INTO employee_keys (employee_id, public_key, created_at) VALUES (?1, ?2, ?3)",
            params![employee_id.to_string(), key_bytes, now],
        )?;

        if superseded > 0 {
            tracing::info!(
                "Rotated key for employee {} (grace {}s)",
                employee_id,
                grace_secs
            );
        }
        Ok(())
    }

    /// Revoke every key of the employee. Takes effect immediately regardless of grace.
    pub fn revoke_all(&self, employee_id: &Uuid, now: i64) -> ServerResult<usize> {
        let revoked = self.conn.execute(
            "UPDATE employee_keys SET revoked_at = ?1
             WHERE employee_id = ?2 AND revoked_at IS NULL",
            params![now, employee_id.to_string()],
        )?;
        Ok(revoked)
    }
}
