//! Registration tokens, pairing links and the registration exchange.
//!
//! A token is issued by a domain for one employee, delivered as a deep link,
//! and consumed exactly once by the device that binds its public key to it.

use crate::protocol::PAIRING_SCHEME;
use crate::{Result, ShiftpassError};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Lifecycle of a registration token. `Consumed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Issued,
    Consumed,
    Expired,
}

/// Employee details prefilled by the domain when the token was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeDraft {
    /// Set when the token re-pairs an existing employee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl EmployeeDraft {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Prefill a form from the draft.
    pub fn to_form(&self) -> EmployeeForm {
        EmployeeForm {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: None,
        }
    }
}

/// A single-use registration token as stored by the domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationToken {
    pub token_id: String,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
    pub draft: EmployeeDraft,
}

impl RegistrationToken {
    /// State at `now`. Consumption wins over expiry.
    pub fn state(&self, now: i64) -> TokenState {
        if self.consumed_at.is_some() {
            TokenState::Consumed
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Issued
        }
    }

    /// Transition `Issued -> Consumed`.
    pub fn consume(&mut self, now: i64) -> Result<()> {
        match self.state(now) {
            TokenState::Issued => {
                self.consumed_at = Some(now);
                Ok(())
            }
            TokenState::Consumed => Err(ShiftpassError::TokenConsumed),
            TokenState::Expired => Err(ShiftpassError::TokenExpired),
        }
    }
}

/// Details the employee confirms on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeForm {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

const MAX_NAME_LEN: usize = 100;

impl EmployeeForm {
    pub fn validate(&self) -> Result<()> {
        validate_name("form.firstName", &self.first_name)?;
        validate_name("form.lastName", &self.last_name)?;

        if let Some(email) = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            let valid = email
                .split_once('@')
                .map(|(local, host)| !local.is_empty() && host.contains('.') && !host.ends_with('.'))
                .unwrap_or(false);
            if !valid {
                return Err(ShiftpassError::validation("form.email", "not an email address"));
            }
        }

        if let Some(phone) = self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            let digits = phone.chars().filter(char::is_ascii_digit).count();
            let allowed = phone
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
            if !allowed || digits < 6 {
                return Err(ShiftpassError::validation("form.phone", "not a phone number"));
            }
        }

        Ok(())
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ShiftpassError::validation(field, "must not be empty"));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ShiftpassError::validation(field, "too long"));
    }
    Ok(())
}

/// `GET /api/registration/{tokenId}` response message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    pub token_id: String,
    pub company_name: String,
    pub expires_at: i64,
    pub employee: EmployeeDraft,
}

/// `POST /api/registration` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub token_id: String,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    pub form: EmployeeForm,
}

/// `POST /api/registration` response message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub employee_id: Uuid,
    pub display_name: String,
    pub company_name: String,
}

/// Deep-link payload that starts pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingLink {
    pub domain: String,
    pub token_id: String,
}

impl PairingLink {
    pub fn new(domain: &str, token_id: &str) -> Result<Self> {
        validate_token_id(token_id)?;
        Ok(Self {
            domain: normalize_domain(domain)?,
            token_id: token_id.to_string(),
        })
    }

    /// Parse `shiftpass://pair?domain=..&token=..` or `https://<domain>/pair/<token>`.
    pub fn parse(link: &str) -> Result<Self> {
        let url = Url::parse(link.trim())
            .map_err(|e| ShiftpassError::validation("link", e.to_string()))?;

        match url.scheme() {
            PAIRING_SCHEME => {
                let is_pair = url.host_str() == Some("pair") || url.path().trim_matches('/') == "pair";
                if !is_pair {
                    return Err(ShiftpassError::validation("link", "not a pairing link"));
                }

                let mut domain = None;
                let mut token = None;
                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "domain" => domain = Some(value.into_owned()),
                        "token" => token = Some(value.into_owned()),
                        _ => {}
                    }
                }

                let domain =
                    domain.ok_or_else(|| ShiftpassError::validation("domain", "missing"))?;
                let token = token.ok_or_else(|| ShiftpassError::validation("token", "missing"))?;
                Self::new(&domain, &token)
            }
            "http" | "https" => {
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                    .unwrap_or_default();

                match segments.as_slice() {
                    ["pair", token] => {
                        let origin = url.origin().ascii_serialization();
                        Self::new(&origin, token)
                    }
                    _ => Err(ShiftpassError::validation("link", "not a pairing link")),
                }
            }
            other => Err(ShiftpassError::validation(
                "link",
                format!("unsupported scheme {}", other),
            )),
        }
    }

    /// Render as a `shiftpass://` deep link.
    pub fn to_uri(&self) -> String {
        let mut uri = format!("{}://pair?", PAIRING_SCHEME);
        uri.push_str(
            &url::form_urlencoded::Serializer::new(String::new())
                .append_pair("domain", &self.domain)
                .append_pair("token", &self.token_id)
                .finish(),
        );
        uri
    }
}

fn validate_token_id(token_id: &str) -> Result<()> {
    let valid = !token_id.is_empty()
        && token_id.len() <= 128
        && token_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ShiftpassError::validation("tokenId", "malformed token"))
    }
}

/// Normalise a domain URL to `scheme://host[:port][/path]` without a trailing slash.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let url = Url::parse(domain.trim())
        .map_err(|e| ShiftpassError::validation("domain", e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ShiftpassError::validation("domain", "must be an http(s) URL"));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ShiftpassError::validation("domain", "missing host"))?;

    let mut normalized = format!("{}://{}", url.scheme(), host.to_ascii_lowercase());
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(url.path().trim_end_matches('/'));
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: i64) -> RegistrationToken {
        RegistrationToken {
            token_id: "tok123".into(),
            expires_at,
            consumed_at: None,
            draft: EmployeeDraft {
                employee_id: None,
                first_name: "Erin".into(),
                last_name: "Example".into(),
                email: None,
            },
        }
    }

    fn form() -> EmployeeForm {
        EmployeeForm {
            first_name: "Erin".into(),
            last_name: "Example".into(),
            email: Some("erin@acme.example".into()),
            phone: Some("+41 44 123 45 67".into()),
        }
    }

    #[test]
    fn token_consumed_once() {
        let mut token = token(1_000);
        assert_eq!(token.state(10), TokenState::Issued);
        token.consume(10).unwrap();
        assert_eq!(token.state(10), TokenState::Consumed);
        assert!(matches!(token.consume(11), Err(ShiftpassError::TokenConsumed)));
        assert_eq!(token.consumed_at, Some(10));
    }

    #[test]
    fn expired_token_stays_unconsumed() {
        let mut token = token(1_000);
        assert_eq!(token.state(1_000), TokenState::Expired);
        assert!(matches!(token.consume(1_000), Err(ShiftpassError::TokenExpired)));
        assert_eq!(token.consumed_at, None);
    }

    #[test]
    fn consumed_never_reverts_to_expired() {
        let mut token = token(1_000);
        token.consume(500).unwrap();
        assert_eq!(token.state(5_000), TokenState::Consumed);
    }

    #[test]
    fn form_validation() {
        assert!(form().validate().is_ok());

        let mut blank = form();
        blank.first_name = "  ".into();
        assert!(matches!(
            blank.validate(),
            Err(ShiftpassError::ValidationError { field, .. }) if field == "form.firstName"
        ));

        let mut email = form();
        email.email = Some("erin.acme.example".into());
        assert!(email.validate().is_err());

        let mut phone = form();
        phone.phone = Some("call me".into());
        assert!(phone.validate().is_err());

        let mut optional = form();
        optional.email = None;
        optional.phone = Some(String::new());
        assert!(optional.validate().is_ok());
    }

    #[test]
    fn parse_deep_link() {
        let link =
            PairingLink::parse("shiftpass://pair?domain=https%3A%2F%2Facme.example%2F&token=tok123")
                .unwrap();
        assert_eq!(link.domain, "https://acme.example");
        assert_eq!(link.token_id, "tok123");
    }

    #[test]
    fn parse_bridge_link() {
        let link = PairingLink::parse("https://acme.example:8443/pair/tok123").unwrap();
        assert_eq!(link.domain, "https://acme.example:8443");
        assert_eq!(link.token_id, "tok123");
    }

    #[test]
    fn deep_link_roundtrip() {
        let link = PairingLink::new("https://acme.example", "tok123").unwrap();
        let uri = link.to_uri();
        assert!(uri.starts_with("shiftpass://pair?domain=https%3A%2F%2Facme.example"));
        assert_eq!(PairingLink::parse(&uri).unwrap(), link);
    }

    #[test]
    fn rejects_foreign_links() {
        assert!(PairingLink::parse("ftp://acme.example/pair/tok123").is_err());
        assert!(PairingLink::parse("https://acme.example/login").is_err());
        assert!(PairingLink::parse("shiftpass://pair?domain=https%3A%2F%2Facme.example").is_err());
        assert!(PairingLink::parse("shiftpass://pair?domain=https%3A%2F%2Facme.example&token=a%20b").is_err());
    }

    #[test]
    fn domain_normalization() {
        assert_eq!(normalize_domain("https://ACME.example/").unwrap(), "https://acme.example");
        assert_eq!(
            normalize_domain("http://127.0.0.1:8744/tenant/").unwrap(),
            "http://127.0.0.1:8744/tenant"
        );
        assert_eq!(
            normalize_domain("https://acme.example:443").unwrap(),
            "https://acme.example"
        );
        assert!(normalize_domain("acme.example").is_err());
    }
}
