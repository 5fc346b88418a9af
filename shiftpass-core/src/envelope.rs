//! Signed request envelopes.
//!
//! Every mutating call is sent as `{...payload, token: Envelope}`. The
//! signature covers the endpoint, the employee, a timestamp, a 128-bit nonce
//! and the canonical JSON of the typed payload:
//!
//! ```text
//! {ACTION}\n{EMPLOYEE_ID}\n{TIMESTAMP}\n{NONCE}\n{hex(SHA256(CANONICAL_PAYLOAD))}
//! ```

use crate::crypto::random_hex;
use crate::identity::DeviceIdentity;
use crate::{Result, ShiftpassError};
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Nonce size in bytes (128 bits).
pub const NONCE_BYTES: usize = 16;

/// A payload that may be signed. Only these typed structs are ever signed.
pub trait SignedPayload: Serialize {
    /// Endpoint path bound into the signature.
    fn action(&self) -> &'static str;
}

/// Signed, timestamped, nonce-tagged wrapper of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub canonical_payload: String,
    pub timestamp: i64,
    pub nonce: String,
    /// Base64 Ed25519 signature.
    pub signature: String,
    pub employee_id: Uuid,
}

/// Body of a mutating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRequest<T> {
    #[serde(flatten)]
    pub payload: T,
    pub token: Envelope,
}

/// Render a payload as JSON with recursively sorted object keys.
pub fn canonicalize<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    Ok(serde_json::to_string(&sort_keys(value))?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Format the string-to-sign for an envelope.
pub fn signing_message(
    action: &str,
    employee_id: &Uuid,
    timestamp: i64,
    nonce: &str,
    canonical_payload: &[u8],
) -> String {
    let payload_hash = hex::encode(Sha256::digest(canonical_payload));
    format!(
        "{}\n{}\n{}\n{}\n{}",
        action, employee_id, timestamp, nonce, payload_hash
    )
}

/// Build an envelope for `payload`, stamped now with a fresh random nonce.
pub fn build_envelope<T: SignedPayload>(payload: &T, identity: &DeviceIdentity) -> Result<Envelope> {
    let timestamp = chrono::Utc::now().timestamp();
    let nonce = random_hex(NONCE_BYTES);
    Envelope::sign(payload, identity, timestamp, nonce)
}

/// Wrap `payload` with a freshly built envelope.
pub fn sign_request<T: SignedPayload + Clone>(
    payload: &T,
    identity: &DeviceIdentity,
) -> Result<SignedRequest<T>> {
    Ok(SignedRequest {
        payload: payload.clone(),
        token: build_envelope(payload, identity)?,
    })
}

impl Envelope {
    /// Sign with an explicit timestamp and nonce.
    pub fn sign<T: SignedPayload>(
        payload: &T,
        identity: &DeviceIdentity,
        timestamp: i64,
        nonce: String,
    ) -> Result<Self> {
        let canonical_payload = canonicalize(payload)?;
        let message = signing_message(
            payload.action(),
            &identity.employee_id,
            timestamp,
            &nonce,
            canonical_payload.as_bytes(),
        );
        let signature = identity.signing_key().sign(message.as_bytes());

        Ok(Self {
            canonical_payload,
            timestamp,
            nonce,
            signature: STANDARD.encode(signature.to_bytes()),
            employee_id: identity.employee_id,
        })
    }

    /// True when `|now - timestamp| <= window_secs`.
    ///
    /// The timestamp is unauthenticated at this point, so any value must be
    /// handled without overflow.
    pub fn is_fresh(&self, now: i64, window_secs: i64) -> bool {
        let window = u64::try_from(window_secs).unwrap_or(0);
        now.abs_diff(self.timestamp) <= window
    }

    /// Check that the nonce is 128 bits of lowercase hex.
    pub fn validate_nonce(&self) -> Result<()> {
        let well_formed = self.nonce.len() == NONCE_BYTES * 2
            && self
                .nonce
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if well_formed {
            Ok(())
        } else {
            Err(ShiftpassError::validation("token.nonce", "must be 32 hex characters"))
        }
    }

    /// Verify this envelope against the payload received next to it.
    ///
    /// The canonical form is recomputed from `payload`; the envelope verifies
    /// if any of `keys` produced the signature.
    pub fn verify<T: SignedPayload>(&self, payload: &T, keys: &[VerifyingKey]) -> Result<()> {
        let recomputed = canonicalize(payload)?;
        if recomputed != self.canonical_payload {
            return Err(ShiftpassError::InvalidSignature);
        }

        let message = signing_message(
            payload.action(),
            &self.employee_id,
            self.timestamp,
            &self.nonce,
            recomputed.as_bytes(),
        );
        verify_message(message.as_bytes(), &self.signature, keys)
    }
}

/// Verify a base64 signature over `message` against any of `keys`.
pub fn verify_message(message: &[u8], signature_b64: &str, keys: &[VerifyingKey]) -> Result<()> {
    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|_| ShiftpassError::InvalidSignature)?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| ShiftpassError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_array);

    if keys.iter().any(|key| key.verify(message, &signature).is_ok()) {
        Ok(())
    } else {
        Err(ShiftpassError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::{AttendanceKind, AttendancePayload, CancelPairing, Geolocation};

    fn identity() -> DeviceIdentity {
        DeviceIdentity::generate("https://acme.example", Uuid::new_v4())
    }

    fn check_in() -> AttendancePayload {
        AttendancePayload::new(
            AttendanceKind::CheckIn,
            7,
            Geolocation::new(47.3769, 8.5417),
        )
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let identity = identity();
        let payload = check_in();
        let envelope = build_envelope(&payload, &identity).unwrap();

        assert_eq!(envelope.employee_id, identity.employee_id);
        assert!(envelope.validate_nonce().is_ok());
        envelope.verify(&payload, &[identity.verifying_key()]).unwrap();
    }

    #[test]
    fn canonical_keys_are_sorted() {
        let canonical = canonicalize(&check_in()).unwrap();
        assert_eq!(
            canonical,
            r#"{"kind":"checkIn","location":{"latitude":47.3769,"longitude":8.5417},"registerId":7}"#
        );
    }

    #[test]
    fn canonical_form_is_independent_of_field_order() {
        let a: AttendancePayload = serde_json::from_str(
            r#"{"registerId":7,"kind":"checkIn","location":{"longitude":8.5417,"latitude":47.3769}}"#,
        )
        .unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&check_in()).unwrap());
    }

    #[test]
    fn every_bit_flip_in_payload_fails() {
        let identity = identity();
        let envelope = build_envelope(&check_in(), &identity).unwrap();
        let key = identity.verifying_key();
        let original = envelope.canonical_payload.as_bytes().to_vec();

        for byte in 0..original.len() {
            for bit in 0..8 {
                let mut tampered = original.clone();
                tampered[byte] ^= 1 << bit;
                let message = signing_message(
                    AttendanceKind::CheckIn.path(),
                    &envelope.employee_id,
                    envelope.timestamp,
                    &envelope.nonce,
                    &tampered,
                );
                assert!(
                    verify_message(message.as_bytes(), &envelope.signature, &[key]).is_err(),
                    "flip of bit {bit} in byte {byte} verified"
                );
            }
        }
    }

    #[test]
    fn tampered_payload_fails() {
        let identity = identity();
        let payload = check_in();
        let envelope = build_envelope(&payload, &identity).unwrap();

        let mut moved = payload.clone();
        moved.register_id = 8;
        assert!(matches!(
            envelope.verify(&moved, &[identity.verifying_key()]),
            Err(ShiftpassError::InvalidSignature)
        ));
    }

    #[test]
    fn forged_canonical_payload_fails() {
        let identity = identity();
        let mut moved = check_in();
        moved.register_id = 8;

        let mut envelope = build_envelope(&check_in(), &identity).unwrap();
        envelope.canonical_payload = canonicalize(&moved).unwrap();
        assert!(envelope
            .verify(&moved, &[identity.verifying_key()])
            .is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let payload = check_in();
        let envelope = build_envelope(&payload, &identity()).unwrap();
        let other = identity();
        assert!(matches!(
            envelope.verify(&payload, &[other.verifying_key()]),
            Err(ShiftpassError::InvalidSignature)
        ));
    }

    #[test]
    fn any_listed_key_verifies() {
        let identity = identity();
        let payload = check_in();
        let envelope = build_envelope(&payload, &identity).unwrap();
        let other = DeviceIdentity::generate("https://acme.example", Uuid::new_v4());
        envelope
            .verify(&payload, &[other.verifying_key(), identity.verifying_key()])
            .unwrap();
    }

    #[test]
    fn action_is_bound_into_signature() {
        let identity = identity();
        let payload = check_in();
        let envelope = build_envelope(&payload, &identity).unwrap();

        let mut as_break = payload.clone();
        as_break.kind = AttendanceKind::Break;
        let mut replayed = envelope.clone();
        replayed.canonical_payload = canonicalize(&as_break).unwrap();
        assert!(replayed
            .verify(&as_break, &[identity.verifying_key()])
            .is_err());
    }

    #[test]
    fn timestamp_and_nonce_are_signed() {
        let identity = identity();
        let payload = check_in();
        let envelope = build_envelope(&payload, &identity).unwrap();
        let key = [identity.verifying_key()];

        let mut later = envelope.clone();
        later.timestamp += 1;
        assert!(later.verify(&payload, &key).is_err());

        let mut renonced = envelope.clone();
        renonced.nonce = random_hex(NONCE_BYTES);
        assert!(renonced.verify(&payload, &key).is_err());
    }

    #[test]
    fn fresh_nonce_per_envelope() {
        let identity = identity();
        let a = build_envelope(&CancelPairing::default(), &identity).unwrap();
        let b = build_envelope(&CancelPairing::default(), &identity).unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn freshness_window() {
        let identity = identity();
        let envelope = Envelope::sign(&check_in(), &identity, 1_000, random_hex(NONCE_BYTES)).unwrap();
        assert!(envelope.is_fresh(1_300, 300));
        assert!(envelope.is_fresh(700, 300));
        assert!(!envelope.is_fresh(1_301, 300));
        assert!(!envelope.is_fresh(699, 300));
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let identity = identity();
        for timestamp in [i64::MIN, i64::MAX] {
            let envelope =
                Envelope::sign(&check_in(), &identity, timestamp, random_hex(NONCE_BYTES)).unwrap();
            assert!(!envelope.is_fresh(1_700_000_000, 300));
        }
        let oldest = Envelope::sign(&check_in(), &identity, i64::MIN, random_hex(NONCE_BYTES)).unwrap();
        assert!(!oldest.is_fresh(i64::MAX, 300));
        assert!(!oldest.is_fresh(1_000, -1));
    }

    #[test]
    fn malformed_nonce_rejected() {
        let identity = identity();
        let envelope = Envelope::sign(&check_in(), &identity, 0, "not-hex".into()).unwrap();
        assert!(envelope.validate_nonce().is_err());
    }

    #[test]
    fn request_body_flattens_payload_next_to_token() {
        let identity = identity();
        let request = sign_request(&check_in(), &identity).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["registerId"], 7);
        assert_eq!(json["kind"], "checkIn");
        assert!(json["token"]["signature"].is_string());

        let parsed: SignedRequest<AttendancePayload> = serde_json::from_value(json).unwrap();
        parsed
            .token
            .verify(&parsed.payload, &[identity.verifying_key()])
            .unwrap();
    }
}
