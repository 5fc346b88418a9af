//! Envelope verification for signed requests.
//!
//! Order of checks: freshness, nonce format, key lookup, canonical payload and signature,
//! then the replay check. The nonce is recorded only once the signature verified, so
//! forged requests never occupy the replay cache.

use crate::error::{ServerError, ServerResult};
use crate::keys::KeyRegistry;
use crate::replay::ReplayCache;
use rusqlite::Connection;
use shiftpass_core::envelope::{SignedPayload, SignedRequest};
use shiftpass_core::ShiftpassError;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct Verifier {
    replay: ReplayCache,
}

impl Verifier {
    pub fn new(replay: ReplayCache) -> Self {
        Self { replay }
    }

    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay
    }

    /// Authenticate `request` and return the employee that signed it.
    pub fn verify<T: SignedPayload>(
        &self,
        conn: &Connection,
        request: &SignedRequest<T>,
        now: i64,
    ) -> ServerResult<Uuid> {
        let envelope = &request.token;
        let employee_id = envelope.employee_id;

        if !envelope.is_fresh(now, self.replay.window_secs()) {
            warn!(
                "Stale envelope from {} (timestamp {}, now {})",
                employee_id, envelope.timestamp, now
            );
            return Err(ServerError::ReplayDetected(format!(
                "timestamp {} outside window",
                envelope.timestamp
            )));
        }
        envelope.validate_nonce().map_err(ServerError::from)?;

        let keys = KeyRegistry::new(conn).verifying_keys(&employee_id, now)?;
        if keys.is_empty() {
            warn!("No valid key for employee {}", employee_id);
            return Err(ServerError::InvalidSignature(format!(
                "no valid key for {}",
                employee_id
            )));
        }

        envelope
            .verify(&request.payload, &keys)
            .map_err(|e| match e {
                ShiftpassError::InvalidSignature => {
                    warn!("Signature check failed for employee {}", employee_id);
                    ServerError::InvalidSignature(format!("bad signature from {}", employee_id))
                }
                other => ServerError::from(other),
            })?;

        self.replay
            .check_and_insert(&employee_id, &envelope.nonce, envelope.timestamp, now)
            .inspect_err(|_| warn!("Nonce replay from employee {}", employee_id))?;

        Ok(employee_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use shiftpass_core::attendance::{AttendanceKind, AttendancePayload, Geolocation};
    use shiftpass_core::envelope::{sign_request, Envelope};
    use shiftpass_core::DeviceIdentity;

    struct Fixture {
        storage: Storage,
        verifier: Verifier,
        identity: DeviceIdentity,
    }

    fn fixture() -> Fixture {
        let storage = Storage::in_memory().unwrap();
        let identity = DeviceIdentity::generate("https://acme.example", Uuid::new_v4());
        {
            let conn = storage.conn().unwrap();
            conn.execute(
                "INSERT INTO employees (employee_id, first_name, last_name, created_at, updated_at)
                 VALUES (?1, 'Erin', 'Example', 0, 0)",
                [identity.employee_id.to_string()],
            )
            .unwrap();
            KeyRegistry::new(&conn)
                .activate(&identity.employee_id, &identity.verifying_key(), 0, 0)
                .unwrap();
        }
        Fixture {
            storage,
            verifier: Verifier::new(ReplayCache::new(300)),
            identity,
        }
    }

    fn payload() -> AttendancePayload {
        AttendancePayload::new(AttendanceKind::CheckIn, 1, Geolocation::new(47.0, 8.0))
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn accepts_then_rejects_replay() {
        let f = fixture();
        let request = sign_request(&payload(), &f.identity).unwrap();
        let conn = f.storage.conn().unwrap();

        assert_eq!(
            f.verifier.verify(&conn, &request, now()).unwrap(),
            f.identity.employee_id
        );
        assert!(matches!(
            f.verifier.verify(&conn, &request, now()),
            Err(ServerError::ReplayDetected(_))
        ));
    }

    #[test]
    fn same_nonce_with_fresh_timestamp_is_replay() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        let nonce = "0123456789abcdef0123456789abcdef".to_string();
        let t = now();

        let first = SignedRequest {
            payload: payload(),
            token: Envelope::sign(&payload(), &f.identity, t, nonce.clone()).unwrap(),
        };
        f.verifier.verify(&conn, &first, t).unwrap();

        let rewrapped = SignedRequest {
            payload: payload(),
            token: Envelope::sign(&payload(), &f.identity, t + 5, nonce).unwrap(),
        };
        assert!(matches!(
            f.verifier.verify(&conn, &rewrapped, t + 5),
            Err(ServerError::ReplayDetected(_))
        ));
    }

    #[test]
    fn stale_timestamp_rejected() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        let request = sign_request(&payload(), &f.identity).unwrap();
        assert!(matches!(
            f.verifier.verify(&conn, &request, now() + 301),
            Err(ServerError::ReplayDetected(_))
        ));
        // A stale request must not burn its nonce.
        assert!(f.verifier.replay_cache().is_empty());
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        for timestamp in [i64::MIN, i64::MAX] {
            let request = SignedRequest {
                payload: payload(),
                token: Envelope::sign(
                    &payload(),
                    &f.identity,
                    timestamp,
                    "0123456789abcdef0123456789abcdef".to_string(),
                )
                .unwrap(),
            };
            assert!(matches!(
                f.verifier.verify(&conn, &request, now()),
                Err(ServerError::ReplayDetected(_))
            ));
        }
        assert!(f.verifier.replay_cache().is_empty());
    }

    #[test]
    fn tampered_payload_rejected_without_recording_nonce() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        let mut request = sign_request(&payload(), &f.identity).unwrap();
        request.payload.register_id = 2;

        assert!(matches!(
            f.verifier.verify(&conn, &request, now()),
            Err(ServerError::InvalidSignature(_))
        ));
        assert!(f.verifier.replay_cache().is_empty());
    }

    #[test]
    fn unknown_employee_is_invalid_signature() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        let stranger = DeviceIdentity::generate("https://acme.example", Uuid::new_v4());
        let request = sign_request(&payload(), &stranger).unwrap();
        assert!(matches!(
            f.verifier.verify(&conn, &request, now()),
            Err(ServerError::InvalidSignature(_))
        ));
    }

    #[test]
    fn claimed_identity_must_match_key() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        // Signed by another key while claiming the registered employee.
        let impostor = DeviceIdentity::generate("https://acme.example", f.identity.employee_id);
        let request = sign_request(&payload(), &impostor).unwrap();
        assert!(matches!(
            f.verifier.verify(&conn, &request, now()),
            Err(ServerError::InvalidSignature(_))
        ));
    }

    #[test]
    fn malformed_nonce_is_validation_error() {
        let f = fixture();
        let conn = f.storage.conn().unwrap();
        let request = SignedRequest {
            payload: payload(),
            token: Envelope::sign(&payload(), &f.identity, now(), "xyz".into()).unwrap(),
        };
        assert!(matches!(
            f.verifier.verify(&conn, &request, now()),
            Err(ServerError::Validation { .. })
        ));
    }
}
