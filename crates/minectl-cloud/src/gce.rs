use async_trait::async_trait;
use gce_api::{
    AccessConfigInsert, AttachedDisk, DiskInsert, FirewallAllowed, FirewallInsert, GceClient,
    InitializeParams, Instance, InstanceInsert, Metadata, MetadataItem, NetworkInterfaceInsert,
    Scheduling, ServiceAccount, ServiceAccountKey, Tags,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::names::aux_names;
use crate::poll::{self, PollConfig, PollState};
use crate::template::{BootstrapTemplate, TemplateKind};
use crate::types::{INSTANCE_TAG, ResourceDescriptor, ServerSpec};
use crate::update::RemoteServer;
use crate::{CloudProvider, Error, ProviderName, Result};

const IMAGE: &str = "projects/ubuntu-os-cloud/global/images/ubuntu-2004-focal-v20210720";
const VOLUME_DEVICE: &str = "sdb";

/// Google Compute Engine provider.
///
/// Every mutation returns a zone-scoped long-running operation which is
/// polled to `DONE` before the next step. SSH access goes through OS Login
/// under the service-account identity, so both the key registration and the
/// login user are derived from the keyfile.
pub struct GceProvider {
    client: GceClient,
    zone: String,
    tmpl: BootstrapTemplate,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl GceProvider {
    /// Create from `GCE_KEY` (path to a service-account keyfile). The zone is
    /// an argument because it scopes every API call, including list.
    pub fn from_env(zone: impl Into<String>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let keyfile = std::env::var("GCE_KEY").map_err(|_| Error::MissingEnv("GCE_KEY".into()))?;
        let key = ServiceAccountKey::from_file(&keyfile)?;

        Ok(Self {
            client: GceClient::new(key),
            zone: zone.into(),
            tmpl: BootstrapTemplate::new(VOLUME_DEVICE)?,
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn machine_type(zone: &str, size: &str) -> String {
        format!("zones/{zone}/machineTypes/{size}")
    }

    fn descriptor(instance: &Instance) -> ResourceDescriptor {
        ResourceDescriptor {
            id: instance.id.clone(),
            name: instance.name.clone(),
            region: instance.zone.clone(),
            public_ip: instance.nat_ip().unwrap_or_default().to_string(),
            tags: instance.tags.items.join(","),
        }
    }

    /// Poll a zone operation until `DONE`, failing if it carries an error.
    async fn await_operation(&self, what: &str, zone: &str, name: &str) -> Result<()> {
        poll::wait_until(what, &self.poll, &self.cancel, || async move {
            let op = self.client.get_zone_operation(zone, name).await?;
            Ok(if op.is_done() {
                match op.error_message() {
                    Some(message) => PollState::Failed(message),
                    None => PollState::Done,
                }
            } else {
                PollState::Pending
            })
        })
        .await?;
        Ok(())
    }

    /// Exactly-one lookup by filter; zero or multiple matches are ambiguous.
    async fn find_one(&self, zone: &str, filter: &str, name: &str) -> Result<Instance> {
        let mut list = self.client.list_instances(zone, filter).await?;
        match list.items.len() {
            1 => Ok(list.items.remove(0)),
            matched => Err(Error::Provisioning {
                name: name.to_string(),
                matched,
            }),
        }
    }
}

#[async_trait]
impl CloudProvider for GceProvider {
    async fn create_server(&self, spec: &ServerSpec) -> Result<ResourceDescriptor> {
        if spec.name.is_empty() {
            return Err(Error::Precondition("instance name must not be empty".into()));
        }
        let aux = aux_names(&spec.name);
        let zone = spec.region.as_str();

        let public_key = tokio::fs::read_to_string(spec.public_key_path())
            .await
            .map_err(|e| {
                Error::Precondition(format!(
                    "cannot read ssh public key {}: {e}",
                    spec.public_key_path().display()
                ))
            })?;
        self.client.import_ssh_public_key(&public_key).await?;

        let disk_op = self
            .client
            .insert_disk(
                zone,
                &DiskInsert {
                    name: aux.volume.clone(),
                    size_gb: spec.volume_size,
                    disk_type: format!("zones/{zone}/diskTypes/pd-standard"),
                },
            )
            .await?;
        self.await_operation("disk insert", zone, &disk_op.name).await?;

        let startup_script = self.tmpl.render(spec, TemplateKind::Bash)?;

        let account = self.client.key().clone();
        let instance = InstanceInsert {
            name: spec.name.clone(),
            machine_type: Self::machine_type(zone, &spec.size),
            disks: vec![
                AttachedDisk {
                    auto_delete: Some(true),
                    boot: Some(true),
                    disk_type: Some("PERSISTENT".into()),
                    disk_size_gb: Some(10),
                    initialize_params: Some(InitializeParams {
                        source_image: IMAGE.into(),
                    }),
                    source: None,
                },
                AttachedDisk {
                    auto_delete: None,
                    boot: None,
                    disk_type: None,
                    disk_size_gb: None,
                    initialize_params: None,
                    source: Some(format!("zones/{zone}/disks/{}", aux.volume)),
                },
            ],
            metadata: Metadata {
                items: vec![
                    MetadataItem {
                        key: "enable-oslogin".into(),
                        value: "TRUE".into(),
                    },
                    MetadataItem {
                        key: "startup-script".into(),
                        value: startup_script,
                    },
                ],
            },
            scheduling: Scheduling {
                automatic_restart: true,
                on_host_maintenance: "MIGRATE".into(),
                preemptible: false,
            },
            network_interfaces: vec![NetworkInterfaceInsert {
                network: "/global/networks/default".into(),
                access_configs: vec![AccessConfigInsert {
                    config_type: "ONE_TO_ONE_NAT".into(),
                    name: "External NAT".into(),
                }],
            }],
            service_accounts: vec![ServiceAccount {
                email: account.client_email.clone(),
                scopes: vec![
                    "https://www.googleapis.com/auth/devstorage.full_control".into(),
                    "https://www.googleapis.com/auth/compute".into(),
                ],
            }],
            labels: HashMap::from([(INSTANCE_TAG.to_string(), "true".to_string())]),
            tags: Tags {
                items: vec![INSTANCE_TAG.to_string(), spec.edition.clone()],
            },
        };

        let insert_op = self.client.insert_instance(zone, &instance).await?;
        self.await_operation("instance insert", zone, &insert_op.name).await?;

        self.client
            .insert_firewall(&FirewallInsert {
                name: aux.firewall.clone(),
                description: "Firewall rule created by minectl".into(),
                network: format!("projects/{}/global/networks/default", self.client.project_id()),
                allowed: vec![FirewallAllowed {
                    ip_protocol: "tcp".into(),
                }],
                source_ranges: vec!["0.0.0.0/0".into()],
                direction: "INGRESS".into(),
                target_tags: vec![INSTANCE_TAG.to_string()],
            })
            .await?;

        // The id and NAT address only exist on the instance the backend
        // actually created, so read it back rather than trusting the insert.
        let created = self
            .find_one(zone, &format!("(name={})", spec.name), &spec.name)
            .await?;
        info!(instance_id = %created.id, name = %created.name, "gce: instance created");
        Ok(Self::descriptor(&created))
    }

    async fn delete_server(&self, id: &str, spec: &ServerSpec) -> Result<()> {
        let aux = aux_names(&spec.name);
        let zone = spec.region.as_str();

        // OS Login cleanup: registered keys and posix accounts for the
        // service-account user. Missing entries are skipped.
        match self.client.get_login_profile().await {
            Ok(profile) => {
                for account in &profile.posix_accounts {
                    if let Err(e) = self.client.delete_oslogin_resource(&account.name).await {
                        if !e.is_not_found() {
                            return Err(e.into());
                        }
                    }
                }
                for key in profile.ssh_public_keys.values() {
                    if let Err(e) = self.client.delete_oslogin_resource(&key.name).await {
                        if !e.is_not_found() {
                            return Err(e.into());
                        }
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                warn!("gce: no login profile to clean up");
            }
            Err(e) => return Err(e.into()),
        }

        let instances = self
            .client
            .list_instances(zone, &format!("(id={id})"))
            .await?;
        match instances.items.first() {
            Some(instance) => {
                let delete_op = self.client.delete_instance(zone, &instance.name).await?;
                self.await_operation("instance delete", zone, &delete_op.name)
                    .await?;
            }
            None => warn!(instance_id = %id, "gce: instance already gone"),
        }

        let disks = self
            .client
            .list_disks(zone, &format!("(name={})", aux.volume))
            .await?;
        for disk in &disks.items {
            if let Err(e) = self.client.delete_disk(zone, &disk.name).await {
                if !e.is_not_found() {
                    return Err(e.into());
                }
                warn!(disk = %disk.name, "gce: disk already gone");
            }
        }

        let firewalls = self
            .client
            .list_firewalls(&format!("(name={})", aux.firewall))
            .await?;
        for firewall in &firewalls.items {
            if let Err(e) = self.client.delete_firewall(&firewall.name).await {
                if !e.is_not_found() {
                    return Err(e.into());
                }
                warn!(firewall = %firewall.name, "gce: firewall already gone");
            }
        }

        info!(instance_id = %id, name = %spec.name, "gce: instance deleted");
        Ok(())
    }

    async fn list_servers(&self) -> Result<Vec<ResourceDescriptor>> {
        let list = self
            .client
            .list_instances(&self.zone, &format!("(labels.{INSTANCE_TAG}=true)"))
            .await?;
        Ok(list.items.iter().map(Self::descriptor).collect())
    }

    async fn update_server(&self, id: &str, spec: &ServerSpec) -> Result<()> {
        let zone = spec.region.as_str();
        let instances = self
            .client
            .list_instances(zone, &format!("(id={id})"))
            .await?;
        let instance = instances.items.first().ok_or_else(|| Error::NotFound {
            resource: "instance",
            name: id.to_string(),
        })?;
        let ip = instance
            .nat_ip()
            .ok_or_else(|| Error::Precondition(format!("instance {id} has no public address")))?;

        let user = format!("sa_{}", self.client.key().client_id);
        let remote = RemoteServer::new(spec.ssh_key_path.clone(), ip, user);
        remote.update_server(spec).await?;
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Gce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_type_is_zone_scoped() {
        assert_eq!(
            GceProvider::machine_type("europe-west1-b", "e2-medium"),
            "zones/europe-west1-b/machineTypes/e2-medium"
        );
    }

    #[test]
    fn descriptor_reads_observed_instance_state() {
        let instance: Instance = serde_json::from_str(
            r#"{
                "id": "5402888",
                "name": "srv1",
                "zone": "zones/europe-west1-b",
                "networkInterfaces": [{"accessConfigs": [{"natIP": "203.0.113.5"}]}],
                "tags": {"items": ["minectl", "java"]}
            }"#,
        )
        .unwrap();

        let descriptor = GceProvider::descriptor(&instance);
        assert_eq!(descriptor.id, "5402888");
        assert_eq!(descriptor.name, "srv1");
        assert_eq!(descriptor.public_ip, "203.0.113.5");
        assert_eq!(descriptor.tags, "minectl,java");
    }
}
