//! Device-side facade tying the vault, the session directory and the
//! domain client together.

use crate::attendance::{
    AttendanceEvent, AttendanceOutcome, AttendancePayload, AttendanceReceipt, ConfirmLocalDevice,
    EmployeeProfile, Geolocation, HistoryQuery, Workplace,
};
use crate::client::DomainClient;
use crate::config::ClientConfig;
use crate::crypto::VaultKey;
use crate::directory::{Aggregate, Domain, SessionDirectory};
use crate::identity::KeyVault;
use crate::registration::{EmployeeForm, PairingLink, RegistrationInfo, RegistrationRequest};
use crate::{Result, ShiftpassError};
use std::time::Duration;
use tracing::{info, warn};

/// Everything a device needs to act on its paired domains.
pub struct Device {
    vault: KeyVault,
    directory: SessionDirectory,
    client: DomainClient,
    timeout: Duration,
}

impl Device {
    /// Open the vault named by `config`, creating the vault key on first use.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        if let Some(parent) = config.vault_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = VaultKey::load_or_create(&config.vault_key_path())?;
        let vault = KeyVault::open(&config.vault_path, key)?;
        Self::with_vault(vault, config.request_timeout())
    }

    pub fn with_vault(vault: KeyVault, timeout: Duration) -> Result<Self> {
        let directory = SessionDirectory::from_vault(&vault)?;
        Ok(Self {
            vault,
            directory,
            client: DomainClient::new(timeout)?,
            timeout,
        })
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    /// Look up what a pairing link would register.
    pub async fn inspect(&self, link: &PairingLink) -> Result<RegistrationInfo> {
        self.client
            .fetch_registration(&link.domain, &link.token_id)
            .await
    }

    /// Pair with the domain behind `link`.
    ///
    /// Without a `form` the employee draft from the token is submitted as is.
    /// The new identity replaces any earlier one for the domain only after the
    /// domain accepted the key.
    pub async fn pair(&mut self, link: &PairingLink, form: Option<EmployeeForm>) -> Result<Domain> {
        let info = self.inspect(link).await?;
        let form = form.unwrap_or_else(|| info.employee.to_form());
        form.validate()?;

        let pending = self.vault.generate_identity(&link.domain, &info.employee)?;
        let request = RegistrationRequest {
            token_id: link.token_id.clone(),
            public_key: pending.public_key,
            form,
        };

        let result = match self.client.register(&link.domain, &request).await {
            Ok(result) => result,
            Err(e) => {
                self.vault.abandon_pairing(&link.domain)?;
                return Err(e);
            }
        };

        let (domain, identity) =
            self.vault
                .commit_pairing(&link.domain, result.employee_id, &result.company_name)?;
        self.directory.insert(domain.clone(), identity);

        info!("Device paired with {} ({})", domain.url, domain.display_name);
        Ok(domain)
    }

    /// Record an attendance action on `domain`.
    pub async fn record(&self, domain: &str, payload: &AttendancePayload) -> Result<AttendanceOutcome> {
        payload.validate()?;
        let identity = self.directory.get_identity(domain)?;
        self.client.submit_attendance(identity, payload).await
    }

    /// Attach a terminal to an event that was recorded without one.
    pub async fn confirm_local_device(
        &self,
        domain: &str,
        event_id: i64,
        local_device_id: i64,
    ) -> Result<AttendanceReceipt> {
        let identity = self.directory.get_identity(domain)?;
        self.client
            .confirm_local_device(
                identity,
                &ConfirmLocalDevice {
                    event_id,
                    local_device_id,
                },
            )
            .await
    }

    pub async fn history(
        &self,
        domain: &str,
        retail_id: Option<i64>,
        query: HistoryQuery,
    ) -> Result<Vec<AttendanceEvent>> {
        let identity = self.directory.get_identity(domain)?;
        self.client.attendances(identity, retail_id, query).await
    }

    /// Today's workplaces across every paired domain.
    pub async fn today_workplaces(&self, location: Geolocation) -> Result<Aggregate<Workplace>> {
        location.validate()?;
        let client = &self.client;
        Ok(self
            .directory
            .aggregate(self.timeout, |_, identity| client.workplaces(identity, location))
            .await)
    }

    /// Employee profile on every paired domain.
    pub async fn my_companies(&self) -> Aggregate<EmployeeProfile> {
        let client = &self.client;
        self.directory
            .aggregate(self.timeout, |_, identity| async move {
                client.me(identity).await.map(|profile| vec![profile])
            })
            .await
    }

    /// Revoke the identity on `domain` and forget it locally.
    ///
    /// A domain that already rejects the identity is treated as unpaired.
    /// With `force` the local identity is dropped even if the domain cannot
    /// be reached.
    pub async fn unpair(&mut self, domain: &str, reason: Option<String>, force: bool) -> Result<()> {
        let identity = self.directory.get_identity(domain)?;
        let url = identity.domain.clone();

        match self.client.cancel_pairing(identity, reason).await {
            Ok(()) => {}
            Err(ShiftpassError::InvalidSignature | ShiftpassError::NotPaired(_)) => {
                warn!("{} no longer recognises this device", url);
            }
            Err(e) if force => {
                warn!("Could not revoke identity on {}: {}", url, e);
            }
            Err(e) => return Err(e),
        }

        self.vault.remove(&url)?;
        self.directory.remove(&url);
        info!("Device unpaired from {}", url);
        Ok(())
    }
}
