use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::{actions_api, servers_api, ssh_keys_api, volumes_api};
use hcloud::models;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::names::aux_names;
use crate::poll::{self, PollConfig, PollState};
use crate::template::{BootstrapTemplate, TemplateKind};
use crate::types::{INSTANCE_TAG, ResourceDescriptor, ServerSpec};
use crate::update::RemoteServer;
use crate::{CloudProvider, Error, ProviderName, Result};

/// Base image every instance boots from; game data lives on the attached
/// volume, which cloud-init mounts as this device.
const IMAGE: &str = "ubuntu-20.04";
const VOLUME_DEVICE: &str = "sdb";

/// Hetzner Cloud provider using the `hcloud` crate.
///
/// Creation is synchronous at the API level but the server only becomes
/// usable once its status reaches `running`, so the poller re-reads the
/// server until then. No firewall resource is created: the project network
/// policy is default-open.
pub struct HetznerProvider {
    config: Configuration,
    tmpl: BootstrapTemplate,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl HetznerProvider {
    /// Create from `HCLOUD_TOKEN`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token =
            std::env::var("HCLOUD_TOKEN").map_err(|_| Error::MissingEnv("HCLOUD_TOKEN".into()))?;

        let mut config = Configuration::new();
        config.bearer_access_token = Some(token);

        Ok(Self {
            config,
            tmpl: BootstrapTemplate::new(VOLUME_DEVICE)?,
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn parse_id(raw: &str) -> Result<i64> {
        raw.parse::<i64>().map_err(|_| Error::InvalidId(raw.to_string()))
    }

    /// Join label keys into the uniform tag string, system tag first.
    fn labels_to_tags(labels: &HashMap<String, String>) -> String {
        let mut tags: Vec<&str> = labels
            .keys()
            .map(String::as_str)
            .filter(|k| *k != INSTANCE_TAG)
            .collect();
        tags.sort_unstable();
        if labels.contains_key(INSTANCE_TAG) {
            tags.insert(0, INSTANCE_TAG);
        }
        tags.join(",")
    }

    fn descriptor(server: &models::Server) -> ResourceDescriptor {
        ResourceDescriptor {
            id: server.id.to_string(),
            name: server.name.clone(),
            region: server.datacenter.location.name.clone(),
            public_ip: server
                .public_net
                .ipv4
                .as_ref()
                .map(|v| v.ip.clone())
                .unwrap_or_default(),
            tags: Self::labels_to_tags(&server.labels),
        }
    }

    async fn get_server(&self, id: i64) -> Result<models::Server> {
        let resp = servers_api::get_server(&self.config, servers_api::GetServerParams { id })
            .await
            .map_err(|e| Error::HetznerApi(format!("get server: {e}")))?;
        resp.server.map(|s| *s).ok_or_else(|| Error::NotFound {
            resource: "server",
            name: id.to_string(),
        })
    }

    /// Wait until the freshly created server reports `running`.
    async fn await_running(&self, id: i64) -> Result<()> {
        poll::wait_until("server running", &self.poll, &self.cancel, || async move {
            let server = self.get_server(id).await?;
            Ok(match server.status {
                models::server::Status::Running => PollState::Done,
                _ => PollState::Pending,
            })
        })
        .await?;
        Ok(())
    }

    /// Wait until the volume leaves `creating`.
    async fn await_volume_available(&self, id: i64) -> Result<()> {
        poll::wait_until("volume available", &self.poll, &self.cancel, || async move {
            let resp =
                volumes_api::get_volume(&self.config, volumes_api::GetVolumeParams { id })
                    .await
                    .map_err(|e| Error::HetznerApi(format!("get volume: {e}")))?;
            let volume = resp.volume;
            Ok(match volume.status {
                models::volume::Status::Available => PollState::Done,
                _ => PollState::Pending,
            })
        })
        .await?;
        Ok(())
    }

    /// Wait until a backend action reaches its terminal state.
    async fn await_action(&self, what: &str, id: i64) -> Result<()> {
        poll::wait_until(what, &self.poll, &self.cancel, || async move {
            let resp = actions_api::get_action(&self.config, actions_api::GetActionParams { id })
                .await
                .map_err(|e| Error::HetznerApi(format!("get action: {e}")))?;
            let action = resp.action;
            Ok(match action.status {
                models::action::Status::Success => PollState::Done,
                models::action::Status::Error => {
                    PollState::Failed(format!("action {} entered error state", action.id))
                }
                _ => PollState::Pending,
            })
        })
        .await?;
        Ok(())
    }

    fn is_not_found_api_error(message: &str) -> bool {
        message.contains("404") || message.contains("not_found")
    }
}

#[async_trait]
impl CloudProvider for HetznerProvider {
    async fn create_server(&self, spec: &ServerSpec) -> Result<ResourceDescriptor> {
        if spec.name.is_empty() {
            return Err(Error::Precondition("instance name must not be empty".into()));
        }
        let aux = aux_names(&spec.name);

        let public_key = tokio::fs::read_to_string(spec.public_key_path())
            .await
            .map_err(|e| {
                Error::Precondition(format!(
                    "cannot read ssh public key {}: {e}",
                    spec.public_key_path().display()
                ))
            })?;

        ssh_keys_api::create_ssh_key(
            &self.config,
            ssh_keys_api::CreateSshKeyParams {
                create_ssh_key_request: models::CreateSshKeyRequest {
                    name: aux.ssh_key.clone(),
                    public_key,
                    labels: None,
                },
            },
        )
        .await
        .map_err(|e| Error::HetznerApi(format!("create ssh key: {e}")))?;

        let volume_resp = volumes_api::create_volume(
            &self.config,
            volumes_api::CreateVolumeParams {
                create_volume_request: models::CreateVolumeRequest {
                    name: aux.volume.clone(),
                    size: spec.volume_size as i32,
                    location: Some(spec.region.clone()),
                    format: Some("ext4".into()),
                    automount: None,
                    labels: None,
                    server: None,
                },
            },
        )
        .await
        .map_err(|e| Error::HetznerApi(format!("create volume: {e}")))?;
        let volume_id = volume_resp.volume.id;
        self.await_volume_available(volume_id).await?;

        let user_data = self.tmpl.render(spec, TemplateKind::CloudConfig)?;

        let labels = HashMap::from([
            (INSTANCE_TAG.to_string(), "true".to_string()),
            (spec.edition.clone(), "true".to_string()),
        ]);

        let created = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: models::CreateServerRequest {
                    name: spec.name.clone(),
                    server_type: spec.size.clone(),
                    image: IMAGE.into(),
                    location: Some(spec.region.clone()),
                    user_data: Some(user_data),
                    networks: None,
                    firewalls: None,
                    ssh_keys: Some(vec![aux.ssh_key.clone()]),
                    volumes: Some(vec![volume_id]),
                    start_after_create: Some(true),
                    automount: Some(true),
                    datacenter: None,
                    labels: Some(labels),
                    placement_group: None,
                    public_net: None,
                },
            },
        )
        .await
        .map_err(|e| Error::HetznerApi(format!("create server: {e}")))?;

        let server_id = created.server.id;
        self.await_running(server_id).await?;

        // Build the descriptor from freshly observed state; the backend only
        // assigns the public address once the server runs.
        let server = self.get_server(server_id).await?;
        info!(server_id, name = %server.name, "hetzner: server created");
        Ok(Self::descriptor(&server))
    }

    async fn delete_server(&self, id: &str, spec: &ServerSpec) -> Result<()> {
        let aux = aux_names(&spec.name);
        let server_id = Self::parse_id(id)?;

        // Volume first: it must be detached before either it or the server
        // can go away. A missing volume is skipped, not fatal.
        let volumes = volumes_api::list_volumes(
            &self.config,
            volumes_api::ListVolumesParams {
                status: None,
                sort: None,
                name: Some(aux.volume.clone()),
                label_selector: None,
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| Error::HetznerApi(format!("list volumes: {e}")))?;

        match volumes.volumes.into_iter().next() {
            Some(volume) => {
                if volume.server.is_some() {
                    let detach = volumes_api::detach_volume(
                        &self.config,
                        volumes_api::DetachVolumeParams { id: volume.id },
                    )
                    .await
                    .map_err(|e| Error::HetznerApi(format!("detach volume: {e}")))?;
                    self.await_action("volume detach", detach.action.id).await?;
                }
                volumes_api::delete_volume(
                    &self.config,
                    volumes_api::DeleteVolumeParams { id: volume.id },
                )
                .await
                .map_err(|e| Error::HetznerApi(format!("delete volume: {e}")))?;
            }
            None => warn!(volume = %aux.volume, "hetzner: volume already gone"),
        }

        if let Err(e) = servers_api::delete_server(
            &self.config,
            servers_api::DeleteServerParams { id: server_id },
        )
        .await
        {
            let msg = format!("{e}");
            if !Self::is_not_found_api_error(&msg) {
                return Err(Error::HetznerApi(format!("delete server: {e}")));
            }
            warn!(server_id, "hetzner: server already gone");
        }

        let keys = ssh_keys_api::list_ssh_keys(
            &self.config,
            ssh_keys_api::ListSshKeysParams {
                sort: None,
                name: Some(aux.ssh_key.clone()),
                fingerprint: None,
                label_selector: None,
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| Error::HetznerApi(format!("list ssh keys: {e}")))?;

        match keys.ssh_keys.into_iter().next() {
            Some(key) => {
                ssh_keys_api::delete_ssh_key(
                    &self.config,
                    ssh_keys_api::DeleteSshKeyParams { id: key.id },
                )
                .await
                .map_err(|e| Error::HetznerApi(format!("delete ssh key: {e}")))?;
            }
            None => warn!(key = %aux.ssh_key, "hetzner: ssh key already gone"),
        }

        info!(server_id, name = %spec.name, "hetzner: server deleted");
        Ok(())
    }

    async fn list_servers(&self) -> Result<Vec<ResourceDescriptor>> {
        let resp = servers_api::list_servers(
            &self.config,
            servers_api::ListServersParams {
                name: None,
                label_selector: Some(INSTANCE_TAG.to_string()),
                sort: None,
                status: None,
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| Error::HetznerApi(format!("list servers: {e}")))?;

        Ok(resp.servers.iter().map(Self::descriptor).collect())
    }

    async fn update_server(&self, id: &str, spec: &ServerSpec) -> Result<()> {
        let server = self.get_server(Self::parse_id(id)?).await?;
        let ip = server
            .public_net
            .ipv4
            .as_ref()
            .map(|v| v.ip.clone())
            .ok_or_else(|| Error::Precondition(format!("server {id} has no public address")))?;

        let remote = RemoteServer::new(spec.ssh_key_path.clone(), ip, "root");
        remote.update_server(spec).await?;
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Hetzner
    }
}
