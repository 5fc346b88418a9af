//! Ed25519 device identities and the local key vault.
//!
//! A keypair is generated per domain when pairing starts and kept as a
//! *pending* identity until the domain acknowledges the registration. The
//! commit replaces any previous identity for that domain in one transaction.
//! Private keys are sealed with the [`VaultKey`] before they touch disk.

use crate::crypto::{open, seal, CryptoError, VaultKey};
use crate::directory::Domain;
use crate::registration::EmployeeDraft;
use crate::{Result, ShiftpassError};
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroize;

/// A (domain, employee) pairing bound to this device.
pub struct DeviceIdentity {
    pub domain: String,
    pub employee_id: Uuid,
    signing_key: SigningKey,
    pub created_at: i64,
}

impl DeviceIdentity {
    /// Generate a new identity with a fresh Ed25519 keypair.
    pub fn generate(domain: &str, employee_id: Uuid) -> Self {
        Self {
            domain: domain.to_string(),
            employee_id,
            signing_key: generate_signing_key(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Get the public (verifying) key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as sent to the domain (base64 of 32 bytes).
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key().to_bytes())
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("domain", &self.domain)
            .field("employee_id", &self.employee_id)
            .field("public_key", &self.public_key_base64())
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn generate_signing_key() -> SigningKey {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    let key = SigningKey::from_bytes(&secret);
    secret.zeroize();
    key
}

/// Decode a base64 public key as sent over the wire.
pub fn decode_public_key(encoded: &str) -> std::result::Result<VerifyingKey, CryptoError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            got: bytes.len(),
        })?;
    VerifyingKey::from_bytes(&array).map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))
}

/// Keypair generated for a pairing that the domain has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIdentity {
    pub domain: String,
    /// Base64 public key to submit with the registration.
    pub public_key: String,
    pub created_at: i64,
}

/// Pairing lifecycle of one domain on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    Pairing,
    Paired,
}

/// SQLite-backed store of every identity this device holds.
pub struct KeyVault {
    conn: Connection,
    key: VaultKey,
}

impl KeyVault {
    /// Open a vault at the specified path
    pub fn open<P: AsRef<Path>>(path: P, key: VaultKey) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let vault = Self { conn, key };
        vault.initialize_schema()?;
        Ok(vault)
    }

    /// Create a new in-memory vault for testing
    pub fn in_memory(key: VaultKey) -> Result<Self> {
        let vault = Self {
            conn: Connection::open_in_memory()?,
            key,
        };
        vault.initialize_schema()?;
        Ok(vault)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                domain TEXT PRIMARY KEY,
                employee_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                signing_key_sealed BLOB NOT NULL,
                public_key BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                paired_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_identities (
                domain TEXT PRIMARY KEY,
                expected_employee_id TEXT,
                signing_key_sealed BLOB NOT NULL,
                public_key BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Start pairing with `domain`: generate a keypair and keep it pending.
    ///
    /// Any earlier unfinished pairing for the same domain is discarded. The
    /// currently paired identity, if any, stays usable until the commit.
    pub fn generate_identity(&self, domain: &str, draft: &EmployeeDraft) -> Result<PendingIdentity> {
        let signing_key = generate_signing_key();
        let mut secret = signing_key.to_bytes();
        let sealed = seal(&self.key, &secret);
        secret.zeroize();
        let sealed = sealed?;

        let public_key = signing_key.verifying_key().to_bytes();
        let now = chrono::Utc::now().timestamp();

        self.conn.execute(
            "INSERT INTO pending_identities
                (domain, expected_employee_id, signing_key_sealed, public_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(domain) DO UPDATE SET
                expected_employee_id = excluded.expected_employee_id,
                signing_key_sealed = excluded.signing_key_sealed,
                public_key = excluded.public_key,
                created_at = excluded.created_at",
            params![
                domain,
                draft.employee_id.map(|id| id.to_string()),
                sealed,
                public_key.to_vec(),
                now
            ],
        )?;

        Ok(PendingIdentity {
            domain: domain.to_string(),
            public_key: STANDARD.encode(public_key),
            created_at: now,
        })
    }

    /// Promote the pending keypair for `domain` after the domain accepted it.
    ///
    /// The previous identity for the domain is replaced in the same transaction.
    pub fn commit_pairing(
        &mut self,
        domain: &str,
        employee_id: Uuid,
        display_name: &str,
    ) -> Result<(Domain, DeviceIdentity)> {
        let tx = self.conn.transaction()?;

        let pending: Option<(Option<String>, Vec<u8>, i64)> = tx
            .query_row(
                "SELECT expected_employee_id, signing_key_sealed, created_at
                 FROM pending_identities WHERE domain = ?1",
                [domain],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (expected, sealed, created_at) =
            pending.ok_or_else(|| ShiftpassError::NotPaired(domain.to_string()))?;

        if let Some(expected) = expected {
            if expected != employee_id.to_string() {
                return Err(ShiftpassError::Protocol(format!(
                    "{} registered employee {} but the token was issued for {}",
                    domain, employee_id, expected
                )));
            }
        }

        let signing_key = unseal_signing_key(&self.key, &sealed)?;
        let paired_at = chrono::Utc::now().timestamp();

        tx.execute("DELETE FROM identities WHERE domain = ?1", [domain])?;
        tx.execute(
            "INSERT INTO identities
                (domain, employee_id, display_name, signing_key_sealed, public_key, created_at, paired_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                domain,
                employee_id.to_string(),
                display_name,
                sealed,
                signing_key.verifying_key().to_bytes().to_vec(),
                created_at,
                paired_at
            ],
        )?;
        tx.execute("DELETE FROM pending_identities WHERE domain = ?1", [domain])?;
        tx.commit()?;

        info!("Paired with {} as employee {}", domain, employee_id);

        let identity = DeviceIdentity {
            domain: domain.to_string(),
            employee_id,
            signing_key,
            created_at,
        };
        let domain = Domain {
            url: domain.to_string(),
            paired_employee_id: employee_id,
            display_name: display_name.to_string(),
            paired_at,
        };
        Ok((domain, identity))
    }

    /// Drop an unfinished pairing.
    pub fn abandon_pairing(&self, domain: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_identities WHERE domain = ?1", [domain])?;
        Ok(())
    }

    /// Load the identity paired with `domain`.
    pub fn load(&self, domain: &str) -> Result<Option<DeviceIdentity>> {
        let row: Option<(String, Vec<u8>, i64)> = self
            .conn
            .query_row(
                "SELECT employee_id, signing_key_sealed, created_at
                 FROM identities WHERE domain = ?1",
                [domain],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(employee_id, sealed, created_at)| {
            Ok(DeviceIdentity {
                domain: domain.to_string(),
                employee_id: parse_employee_id(&employee_id)?,
                signing_key: unseal_signing_key(&self.key, &sealed)?,
                created_at,
            })
        })
        .transpose()
    }

    /// Every paired domain with its identity, in pairing order.
    pub fn load_all(&self) -> Result<Vec<(Domain, DeviceIdentity)>> {
        let mut stmt = self.conn.prepare(
            "SELECT domain, employee_id, display_name, signing_key_sealed, created_at, paired_at
             FROM identities ORDER BY paired_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(domain, employee_id, display_name, sealed, created_at, paired_at)| {
                    let employee_id = parse_employee_id(&employee_id)?;
                    let identity = DeviceIdentity {
                        domain: domain.clone(),
                        employee_id,
                        signing_key: unseal_signing_key(&self.key, &sealed)?,
                        created_at,
                    };
                    let domain = Domain {
                        url: domain,
                        paired_employee_id: employee_id,
                        display_name,
                        paired_at,
                    };
                    Ok((domain, identity))
                },
            )
            .collect()
    }

    /// Forget the identity (and any pending keypair) for `domain`.
    pub fn remove(&self, domain: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM identities WHERE domain = ?1", [domain])?;
        self.abandon_pairing(domain)?;
        Ok(removed > 0)
    }

    pub fn pairing_state(&self, domain: &str) -> Result<PairingState> {
        let pending: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_identities WHERE domain = ?1)",
            [domain],
            |row| row.get(0),
        )?;
        let paired: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM identities WHERE domain = ?1)",
            [domain],
            |row| row.get(0),
        )?;

        Ok(match (pending, paired) {
            (true, _) => PairingState::Pairing,
            (false, true) => PairingState::Paired,
            (false, false) => PairingState::Unpaired,
        })
    }
}

fn unseal_signing_key(key: &VaultKey, sealed: &[u8]) -> Result<SigningKey> {
    let mut secret = open(key, sealed)?;
    let array: std::result::Result<[u8; 32], _> = secret.as_slice().try_into();
    let len = secret.len();
    secret.zeroize();

    let mut array = array.map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        got: len,
    })?;
    let signing_key = SigningKey::from_bytes(&array);
    array.zeroize();
    Ok(signing_key)
}

fn parse_employee_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| ShiftpassError::Protocol(format!("Invalid employee id in vault: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACME: &str = "https://acme.example";

    fn draft() -> EmployeeDraft {
        EmployeeDraft {
            employee_id: None,
            first_name: "Erin".into(),
            last_name: "Example".into(),
            email: None,
        }
    }

    fn vault() -> KeyVault {
        KeyVault::in_memory(VaultKey::generate()).unwrap()
    }

    #[test]
    fn generate_identity_has_distinct_keys() {
        let a = DeviceIdentity::generate(ACME, Uuid::new_v4());
        let b = DeviceIdentity::generate(ACME, Uuid::new_v4());
        assert_ne!(a.public_key_base64(), b.public_key_base64());
        assert_eq!(decode_public_key(&a.public_key_base64()).unwrap(), a.verifying_key());
    }

    #[test]
    fn debug_output_hides_private_key() {
        let identity = DeviceIdentity::generate(ACME, Uuid::new_v4());
        let secret = STANDARD.encode(identity.signing_key().to_bytes());
        let debug = format!("{:?}", identity);
        assert!(!debug.contains(&secret));
        assert!(debug.contains(&identity.public_key_base64()));
    }

    #[test]
    fn pairing_state_machine() {
        let mut vault = vault();
        assert_eq!(vault.pairing_state(ACME).unwrap(), PairingState::Unpaired);

        vault.generate_identity(ACME, &draft()).unwrap();
        assert_eq!(vault.pairing_state(ACME).unwrap(), PairingState::Pairing);
        assert!(vault.load(ACME).unwrap().is_none());

        vault.commit_pairing(ACME, Uuid::new_v4(), "Acme").unwrap();
        assert_eq!(vault.pairing_state(ACME).unwrap(), PairingState::Paired);
    }

    #[test]
    fn commit_uses_the_pending_key() {
        let mut vault = vault();
        let pending = vault.generate_identity(ACME, &draft()).unwrap();
        let (domain, identity) = vault.commit_pairing(ACME, Uuid::new_v4(), "Acme").unwrap();
        assert_eq!(identity.public_key_base64(), pending.public_key);

        let loaded = vault.load(ACME).unwrap().unwrap();
        assert_eq!(loaded.public_key_base64(), pending.public_key);
        assert_eq!(loaded.employee_id, identity.employee_id);

        let (stored, _) = vault.load_all().unwrap().remove(0);
        assert_eq!(stored.paired_at, domain.paired_at);
        assert_eq!(stored.display_name, "Acme");
        assert_eq!(stored.paired_employee_id, domain.paired_employee_id);
    }

    #[test]
    fn repairing_replaces_identity() {
        let mut vault = vault();
        let employee = Uuid::new_v4();

        vault.generate_identity(ACME, &draft()).unwrap();
        let (_, first) = vault.commit_pairing(ACME, employee, "Acme").unwrap();

        vault.generate_identity(ACME, &draft()).unwrap();
        // The old identity stays usable while the re-pairing is in flight.
        assert_eq!(
            vault.load(ACME).unwrap().unwrap().public_key_base64(),
            first.public_key_base64()
        );
        assert_eq!(vault.pairing_state(ACME).unwrap(), PairingState::Pairing);

        let (_, second) = vault.commit_pairing(ACME, employee, "Acme").unwrap();
        assert_ne!(first.public_key_base64(), second.public_key_base64());
        assert_eq!(vault.load_all().unwrap().len(), 1);
    }

    #[test]
    fn commit_without_pending_is_not_paired() {
        let mut vault = vault();
        assert!(matches!(
            vault.commit_pairing(ACME, Uuid::new_v4(), "Acme"),
            Err(ShiftpassError::NotPaired(_))
        ));
    }

    #[test]
    fn commit_rejects_unexpected_employee() {
        let mut vault = vault();
        let mut expected = draft();
        expected.employee_id = Some(Uuid::new_v4());
        vault.generate_identity(ACME, &expected).unwrap();

        assert!(matches!(
            vault.commit_pairing(ACME, Uuid::new_v4(), "Acme"),
            Err(ShiftpassError::Protocol(_))
        ));
        assert_eq!(vault.pairing_state(ACME).unwrap(), PairingState::Pairing);
    }

    #[test]
    fn private_key_is_sealed_at_rest() {
        let mut vault = vault();
        vault.generate_identity(ACME, &draft()).unwrap();
        let (_, identity) = vault.commit_pairing(ACME, Uuid::new_v4(), "Acme").unwrap();
        let secret = identity.signing_key().to_bytes().to_vec();

        let stored: Vec<u8> = vault
            .conn
            .query_row(
                "SELECT signing_key_sealed FROM identities WHERE domain = ?1",
                [ACME],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!stored.windows(secret.len()).any(|w| w == secret.as_slice()));
    }

    #[test]
    fn wrong_vault_key_cannot_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        {
            let mut vault = KeyVault::open(&path, VaultKey::generate()).unwrap();
            vault.generate_identity(ACME, &draft()).unwrap();
            vault.commit_pairing(ACME, Uuid::new_v4(), "Acme").unwrap();
        }
        let vault = KeyVault::open(&path, VaultKey::generate()).unwrap();
        assert!(matches!(vault.load(ACME), Err(ShiftpassError::Crypto(_))));
    }

    #[test]
    fn load_all_keeps_pairing_order() {
        let mut vault = vault();
        for domain in ["https://b.example", "https://a.example", "https://c.example"] {
            vault.generate_identity(domain, &draft()).unwrap();
            vault.commit_pairing(domain, Uuid::new_v4(), domain).unwrap();
        }
        let order: Vec<String> = vault
            .load_all()
            .unwrap()
            .into_iter()
            .map(|(domain, _)| domain.url)
            .collect();
        assert_eq!(
            order,
            vec!["https://b.example", "https://a.example", "https://c.example"]
        );
    }

    #[test]
    fn remove_forgets_identity() {
        let mut vault = vault();
        vault.generate_identity(ACME, &draft()).unwrap();
        vault.commit_pairing(ACME, Uuid::new_v4(), "Acme").unwrap();

        assert!(vault.remove(ACME).unwrap());
        assert!(vault.load(ACME).unwrap().is_none());
        assert!(!vault.remove(ACME).unwrap());
    }

    #[test]
    fn malformed_public_keys_rejected() {
        assert!(decode_public_key("not base64!").is_err());
        assert!(matches!(
            decode_public_key(&STANDARD.encode([0u8; 16])),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }
}
