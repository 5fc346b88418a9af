//! Multi-domain session directory.
//!
//! Holds every domain this device is paired with, in pairing order, and the
//! identity used for each. Read-only aggregations fan out to all domains in
//! parallel with an independent timeout per domain; one slow or failing
//! domain is reported on its own and never holds back the others.

use crate::envelope::{build_envelope, sign_request, Envelope, SignedPayload, SignedRequest};
use crate::identity::{DeviceIdentity, KeyVault};
use crate::registration::normalize_domain;
use crate::{Result, ShiftpassError};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A paired employer domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub url: String,
    pub paired_employee_id: Uuid,
    pub display_name: String,
    pub paired_at: i64,
}

/// One aggregated item and the domain it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tagged<T> {
    pub domain: String,
    pub display_name: String,
    pub item: T,
}

/// A domain that did not answer an aggregation.
#[derive(Debug)]
pub struct DomainFailure {
    pub domain: String,
    pub error: ShiftpassError,
}

/// Merged result of a fan-out. Both lists follow domain order.
#[derive(Debug)]
pub struct Aggregate<T> {
    pub items: Vec<Tagged<T>>,
    pub failures: Vec<DomainFailure>,
}

impl<T> Aggregate<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The set of domains and identities of one device.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    domains: Vec<Domain>,
    identities: HashMap<String, DeviceIdentity>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every paired identity from the vault.
    pub fn from_vault(vault: &KeyVault) -> Result<Self> {
        let mut directory = Self::new();
        for (domain, identity) in vault.load_all()? {
            directory.insert(domain, identity);
        }
        Ok(directory)
    }

    /// Add or replace a domain. A re-paired domain moves to the end.
    pub fn insert(&mut self, mut domain: Domain, identity: DeviceIdentity) {
        domain.url = lookup_key(&domain.url);
        self.domains.retain(|d| d.url != domain.url);
        self.identities.insert(domain.url.clone(), identity);
        self.domains.push(domain);
    }

    pub fn remove(&mut self, url: &str) -> Option<DeviceIdentity> {
        let key = lookup_key(url);
        self.domains.retain(|d| d.url != key);
        self.identities.remove(&key)
    }

    pub fn list_domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn domain(&self, url: &str) -> Option<&Domain> {
        let key = lookup_key(url);
        self.domains.iter().find(|d| d.url == key)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Identity paired with `url`, or `NotPaired`.
    pub fn get_identity(&self, url: &str) -> Result<&DeviceIdentity> {
        let key = lookup_key(url);
        self.identities
            .get(&key)
            .ok_or(ShiftpassError::NotPaired(key))
    }

    /// Build an envelope for a call to `url`.
    pub fn envelope_for<T: SignedPayload>(&self, url: &str, payload: &T) -> Result<Envelope> {
        build_envelope(payload, self.get_identity(url)?)
    }

    /// Build the full signed body for a call to `url`.
    pub fn sign_for<T: SignedPayload + Clone>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<SignedRequest<T>> {
        sign_request(payload, self.get_identity(url)?)
    }

    /// Run `fetch` against every paired domain in parallel.
    ///
    /// Each call is bounded by `timeout`; a timeout is recorded as
    /// `DomainUnreachable` for that domain only.
    pub async fn aggregate<'a, T, F, Fut>(&'a self, timeout: Duration, fetch: F) -> Aggregate<T>
    where
        F: Fn(&'a Domain, &'a DeviceIdentity) -> Fut,
        Fut: Future<Output = Result<Vec<T>>> + 'a,
    {
        let calls = self.domains.iter().map(|domain| {
            let call = self
                .identities
                .get(&domain.url)
                .map(|identity| fetch(domain, identity));

            async move {
                let outcome = match call {
                    Some(call) => match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(ShiftpassError::DomainUnreachable(format!(
                            "{} (timed out after {} ms)",
                            domain.url,
                            timeout.as_millis()
                        ))),
                    },
                    None => Err(ShiftpassError::NotPaired(domain.url.clone())),
                };
                (domain, outcome)
            }
        });

        let mut aggregate = Aggregate {
            items: Vec::new(),
            failures: Vec::new(),
        };

        for (domain, outcome) in join_all(calls).await {
            match outcome {
                Ok(items) => {
                    debug!("{} returned {} items", domain.url, items.len());
                    aggregate.items.extend(items.into_iter().map(|item| Tagged {
                        domain: domain.url.clone(),
                        display_name: domain.display_name.clone(),
                        item,
                    }));
                }
                Err(error) => {
                    warn!("Aggregation failed for {}: {}", domain.url, error);
                    aggregate.failures.push(DomainFailure {
                        domain: domain.url.clone(),
                        error,
                    });
                }
            }
        }

        aggregate
    }
}

fn lookup_key(url: &str) -> String {
    normalize_domain(url).unwrap_or_else(|_| url.to_string())
}
