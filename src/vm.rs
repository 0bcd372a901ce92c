//! iland implementation of [`VirtualMachine`].

use crate::client::{ApiClient, IlandClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::VirtualMachine;
use crate::ssh::{self, Credentials, Options, SshClient, SSH_PORT};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Snapshot of an iland VM as last returned by `GET /vm/{uuid}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Details {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "status")]
    pub state: String,
    pub description: String,
    #[serde(rename = "cpus_number")]
    pub cpu_count: i64,
    pub memory_size: i64,
    #[serde(rename = "os")]
    pub operating_system: String,
    pub deleted: bool,
    pub vapp_uuid: String,
}

/// Parameters for cloning a new VM into the parent vApp of an existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub ip_address_mode: String,
    pub network_uuid: String,
    pub vapp_template_uuid: String,
    pub vapp_template_name: String,
    pub vm_template_uuid: String,
    pub ip_address: String,
    pub storage_profile_uuid: String,
}

/// One entry of `GET /vm/{uuid}/vnics`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Vnic {
    pub ip_addr: Option<String>,
}

pub struct Vm<C: ApiClient = IlandClient> {
    pub config: Config,
    pub details: Details,
    /// Used for the SSH hand-off only, never sent to iland.
    pub credentials: Credentials,
    /// Consumed by [`VirtualMachine::provision`].
    pub templates: Vec<Template>,
    client: Option<C>,
}

impl<C: ApiClient> Vm<C> {
    /// The uuid must be known up front, every refresh is keyed by it.
    pub fn new(config: Config, uuid: impl Into<String>) -> Self {
        Self {
            config,
            details: Details {
                uuid: uuid.into(),
                ..Default::default()
            },
            credentials: Credentials::default(),
            templates: Vec::new(),
            client: None,
        }
    }

    /// Like [`Vm::new`] but with an already constructed client.
    pub fn with_client(config: Config, uuid: impl Into<String>, client: C) -> Self {
        Self {
            client: Some(client),
            ..Self::new(config, uuid)
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_templates(mut self, templates: Vec<Template>) -> Self {
        self.templates = templates;
        self
    }

    fn client(&mut self) -> &C {
        let config = &self.config;
        self.client.get_or_insert_with(|| C::from_config(config))
    }

    fn vm_endpoint(&self, suffix: &str) -> String {
        format!("/vm/{}{suffix}", self.details.uuid)
    }

    /// Replaces the cached details with a fresh copy from iland.
    pub async fn update_info(&mut self) -> Result<()> {
        if self.details.uuid.is_empty() {
            return Err(Error::MissingId);
        }
        let endpoint = self.vm_endpoint("");
        let updated = self.client().get(&endpoint).await?;
        let details = serde_json::from_str(&updated).map_err(|source| Error::Parse {
            uuid: self.details.uuid.clone(),
            source,
        })?;
        self.details = details;
        Ok(())
    }

    async fn power(&mut self, action: &str) -> Result<()> {
        let endpoint = self.vm_endpoint(&format!("/{action}"));
        self.client().post(&endpoint, None).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C: ApiClient> VirtualMachine for Vm<C> {
    /// Refresh failures are swallowed and reported as an empty name. Callers relying on the name
    /// to detect a missing VM should use [`VirtualMachine::state`] instead.
    async fn name(&mut self) -> String {
        match self.update_info().await {
            Ok(()) => self.details.name.clone(),
            Err(_) => String::new(),
        }
    }

    async fn provision(&mut self) -> Result<()> {
        self.update_info().await?;
        let templates = serde_json::to_string(&self.templates).map_err(Error::Encode)?;
        let endpoint = format!("/vapp/{}/vms", self.details.vapp_uuid);
        self.client().post(&endpoint, Some(&templates)).await?;
        Ok(())
    }

    async fn ips(&mut self) -> Result<Vec<IpAddr>> {
        let endpoint = self.vm_endpoint("/vnics");
        let vnics = self.client().get(&endpoint).await?;
        let vnics: Vec<Vnic> = serde_json::from_str(&vnics).map_err(Error::Decode)?;
        Ok(vnics
            .into_iter()
            .filter_map(|vnic| vnic.ip_addr?.parse::<IpAddr>().ok())
            .collect())
    }

    /// Uses the cached uuid as is, without refreshing first.
    async fn destroy(&mut self) -> Result<()> {
        let endpoint = self.vm_endpoint("");
        self.client().delete(&endpoint).await?;
        Ok(())
    }

    async fn state(&mut self) -> Result<String> {
        self.update_info().await?;
        Ok(self.details.state.clone())
    }

    async fn suspend(&mut self) -> Result<()> {
        self.power("suspend").await
    }

    /// iland has no dedicated resume call, powering on brings a suspended VM back.
    async fn resume(&mut self) -> Result<()> {
        self.start().await
    }

    async fn halt(&mut self) -> Result<()> {
        self.power("poweroff").await
    }

    async fn start(&mut self) -> Result<()> {
        self.power("poweron").await
    }

    async fn ssh(&mut self, options: Options) -> Result<SshClient> {
        let ips = ssh::vm_ips(&mut *self, &options).await?;
        let ip = *ips.first().ok_or(Error::NoIp)?;
        Ok(SshClient::new(self.credentials.clone(), ip, SSH_PORT, options))
    }
}
