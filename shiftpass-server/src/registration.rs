//! Registration tokens and binding device keys to employees.

use crate::error::{ServerError, ServerResult};
use crate::keys::KeyRegistry;
use crate::storage::admin::load_employee;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use shiftpass_core::crypto::random_token;
use shiftpass_core::identity::decode_public_key;
use shiftpass_core::registration::{
    EmployeeDraft, RegistrationInfo, RegistrationRequest, RegistrationResult, RegistrationToken,
    TokenState,
};
use tracing::info;
use uuid::Uuid;

/// Issue a token for a new employee described by `draft`.
pub fn issue_token(
    conn: &Connection,
    draft: &EmployeeDraft,
    ttl_secs: i64,
    now: i64,
) -> ServerResult<RegistrationToken> {
    draft.to_form().validate()?;

    if let Some(employee_id) = draft.employee_id {
        if load_employee(conn, &employee_id)?.is_none() {
            return Err(ServerError::NotFound(format!("employee {}", employee_id)));
        }
    }

    let token = RegistrationToken {
        token_id: random_token(),
        expires_at: now + ttl_secs,
        consumed_at: None,
        draft: draft.clone(),
    };

    conn.execute(
        "INSERT INTO registration_tokens
            (token_id, employee_id, first_name, last_name, email, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            token.token_id,
            draft.employee_id.map(|id| id.to_string()),
            draft.first_name,
            draft.last_name,
            draft.email,
            now,
            token.expires_at
        ],
    )?;

    info!("Issued registration token for {}", draft.display_name());
    Ok(token)
}

/// Issue a token that re-pairs an existing employee on a new device.
pub fn issue_repair_token(
    conn: &Connection,
    employee_id: &Uuid,
    ttl_secs: i64,
    now: i64,
) -> ServerResult<RegistrationToken> {
    let employee = load_employee(conn, employee_id)?
        .ok_or_else(|| ServerError::NotFound(format!("employee {}", employee_id)))?;
    let draft = EmployeeDraft {
        employee_id: Some(*employee_id),
        first_name: employee.first_name,
        last_name: employee.last_name,
        email: employee.email,
    };
    issue_token(conn, &draft, ttl_secs, now)
}

pub fn load_token(conn: &Connection, token_id: &str) -> ServerResult<Option<RegistrationToken>> {
    let row = conn
        .query_row(
            "SELECT employee_id, first_name, last_name, email, expires_at, consumed_at
             FROM registration_tokens WHERE token_id = ?1",
            [token_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        )
        .optional()?;

    row.map(
        |(employee_id, first_name, last_name, email, expires_at, consumed_at)| {
            let employee_id = employee_id
                .map(|id| Uuid::parse_str(&id))
                .transpose()
                .map_err(|e| ServerError::Internal(format!("Bad employee id on token: {}", e)))?;
            Ok(RegistrationToken {
                token_id: token_id.to_string(),
                expires_at,
                consumed_at,
                draft: EmployeeDraft {
                    employee_id,
                    first_name,
                    last_name,
                    email,
                },
            })
        },
    )
    .transpose()
}

/// What the device shows before the employee confirms pairing.
pub fn registration_info(
    conn: &Connection,
    token_id: &str,
    company_name: &str,
    now: i64,
) -> ServerResult<RegistrationInfo> {
    let token = load_token(conn, token_id)?.ok_or(ServerError::TokenNotFound)?;
    match token.state(now) {
        TokenState::Issued => Ok(RegistrationInfo {
            token_id: token.token_id,
            company_name: company_name.to_string(),
            expires_at: token.expires_at,
            employee: token.draft,
        }),
        TokenState::Consumed => Err(ServerError::TokenConsumed),
        TokenState::Expired => Err(ServerError::TokenExpired),
    }
}

/// Bind the submitted public key to the token's employee.
///
/// Runs as one immediate transaction: token state, employee upsert, key
/// rotation and consumption all commit together or not at all.
pub fn consume_registration_token(
    conn: &mut Connection,
    request: &RegistrationRequest,
    company_name: &str,
    grace_secs: i64,
    now: i64,
) -> ServerResult<RegistrationResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut token = load_token(&tx, &request.token_id)?.ok_or(ServerError::TokenNotFound)?;
    token.consume(now)?;

    request.form.validate()?;
    let public_key = decode_public_key(&request.public_key)
        .map_err(|e| ServerError::validation("publicKey", e.to_string()))?;

    let employee_id = token.draft.employee_id.unwrap_or_else(Uuid::new_v4);
    tx.execute(
        "INSERT INTO employees (employee_id, first_name, last_name, email, phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(employee_id) DO UPDATE SET
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            email = excluded.email,
            phone = excluded.phone,
            updated_at = excluded.updated_at",
        params![
            employee_id.to_string(),
            request.form.first_name.trim(),
            request.form.last_name.trim(),
            request.form.email,
            request.form.phone,
            now
        ],
    )?;

    KeyRegistry::new(&tx).activate(&employee_id, &public_key, now, grace_secs)?;

    let consumed = tx.execute(
        "UPDATE registration_tokens SET consumed_at = ?1, employee_id = ?2
         WHERE token_id = ?3 AND consumed_at IS NULL",
        params![now, employee_id.to_string(), request.token_id],
    )?;
    if consumed != 1 {
        return Err(ServerError::TokenConsumed);
    }

    tx.commit()?;
    info!("Employee {} paired a device", employee_id);

    Ok(RegistrationResult {
        employee_id,
        display_name: request.form.display_name(),
        company_name: company_name.to_string(),
    })
}

/// Unconsumed tokens that expired before `now`.
pub fn count_expired_tokens(conn: &Connection, now: i64) -> ServerResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM registration_tokens WHERE consumed_at IS NULL AND expires_at <= ?1",
        [now],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use shiftpass_core::registration::EmployeeForm;
    use shiftpass_core::DeviceIdentity;

    const COMPANY: &str = "Acme Retail";

    fn draft() -> EmployeeDraft {
        EmployeeDraft {
            employee_id: None,
            first_name: "Erin".into(),
            last_name: "Example".into(),
            email: Some("erin@acme.example".into()),
        }
    }

    fn request(token_id: &str) -> RegistrationRequest {
        let identity = DeviceIdentity::generate("https://acme.example", Uuid::nil());
        RegistrationRequest {
            token_id: token_id.to_string(),
            public_key: identity.public_key_base64(),
            form: draft().to_form(),
        }
    }

    #[test]
    fn token_consumed_exactly_once() {
        let storage = Storage::in_memory().unwrap();
        let mut conn = storage.conn().unwrap();
        let token = issue_token(&conn, &draft(), 3600, 100).unwrap();

        let result =
            consume_registration_token(&mut conn, &request(&token.token_id), COMPANY, 0, 200).unwrap();
        assert_eq!(result.display_name, "Erin Example");
        assert_eq!(result.company_name, COMPANY);

        for _ in 0..2 {
            assert!(matches!(
                consume_registration_token(&mut conn, &request(&token.token_id), COMPANY, 0, 201),
                Err(ServerError::TokenConsumed)
            ));
        }
        assert!(matches!(
            registration_info(&conn, &token.token_id, COMPANY, 202),
            Err(ServerError::TokenConsumed)
        ));
    }

    #[test]
    fn expired_token_is_rejected_and_left_unconsumed() {
        let storage = Storage::in_memory().unwrap();
        let mut conn = storage.conn().unwrap();
        let token = issue_token(&conn, &draft(), 60, 100).unwrap();

        assert!(matches!(
            consume_registration_token(&mut conn, &request(&token.token_id), COMPANY, 0, 160),
            Err(ServerError::TokenExpired)
        ));
        let stored = load_token(&conn, &token.token_id).unwrap().unwrap();
        assert_eq!(stored.consumed_at, None);
        assert_eq!(count_expired_tokens(&conn, 160).unwrap(), 1);
    }

    #[test]
    fn unknown_token() {
        let storage = Storage::in_memory().unwrap();
        let mut conn = storage.conn().unwrap();
        assert!(matches!(
            registration_info(&conn, "missing", COMPANY, 0),
            Err(ServerError::TokenNotFound)
        ));
        assert!(matches!(
            consume_registration_token(&mut conn, &request("missing"), COMPANY, 0, 0),
            Err(ServerError::TokenNotFound)
        ));
    }

    #[test]
    fn invalid_form_rolls_back() {
        let storage = Storage::in_memory().unwrap();
        let mut conn = storage.conn().unwrap();
        let token = issue_token(&conn, &draft(), 3600, 100).unwrap();

        let mut bad = request(&token.token_id);
        bad.form = EmployeeForm {
            first_name: "".into(),
            ..bad.form
        };
        assert!(matches!(
            consume_registration_token(&mut conn, &bad, COMPANY, 0, 200),
            Err(ServerError::Validation { .. })
        ));

        let mut bad_key = request(&token.token_id);
        bad_key.public_key = "AAAA".into();
        assert!(matches!(
            consume_registration_token(&mut conn, &bad_key, COMPANY, 0, 200),
            Err(ServerError::Validation { ref field, .. }) if field == "publicKey"
        ));

        // Token still usable after the failed attempts.
        consume_registration_token(&mut conn, &request(&token.token_id), COMPANY, 0, 200).unwrap();
    }

    #[test]
    fn repair_token_keeps_employee_and_rotates_key() {
        let storage = Storage::in_memory().unwrap();
        let mut conn = storage.conn().unwrap();
        let first = issue_token(&conn, &draft(), 3600, 100).unwrap();
        let employee_id = consume_registration_token(&mut conn, &request(&first.token_id), COMPANY, 0, 100)
            .unwrap()
            .employee_id;

        let repair = issue_repair_token(&conn, &employee_id, 3600, 200).unwrap();
        assert_eq!(repair.draft.employee_id, Some(employee_id));
        let info = registration_info(&conn, &repair.token_id, COMPANY, 200).unwrap();
        assert_eq!(info.employee.employee_id, Some(employee_id));

        let second = request(&repair.token_id);
        let result = consume_registration_token(&mut conn, &second, COMPANY, 0, 300).unwrap();
        assert_eq!(result.employee_id, employee_id);

        let keys = KeyRegistry::new(&conn).verifying_keys(&employee_id, 300).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], decode_public_key(&second.public_key).unwrap());
    }

    #[test]
    fn repair_token_for_unknown_employee() {
        let storage = Storage::in_memory().unwrap();
        let conn = storage.conn().unwrap();
        assert!(matches!(
            issue_repair_token(&conn, &Uuid::new_v4(), 60, 0),
            Err(ServerError::NotFound(_))
        ));
    }
}
