pub mod gce;
pub mod hetzner;
pub mod names;
pub mod poll;
pub mod template;
pub mod types;
pub mod update;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use types::{ResourceDescriptor, ServerSpec};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hetzner api error: {0}")]
    HetznerApi(String),

    #[error("gce api error: {0}")]
    Gce(#[from] gce_api::Error),

    #[error("bootstrap template error: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Update(#[from] update::UpdateError),

    #[error("{resource} {name} not found")]
    NotFound {
        resource: &'static str,
        name: String,
    },

    #[error("provisioning ambiguous: {matched} instances named {name}")]
    Provisioning { name: String, matched: usize },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{what} failed: {reason}")]
    OperationFailed { what: String, reason: String },

    #[error("timed out waiting for {what} after {polls} polls ({elapsed:?})")]
    PollTimeout {
        what: String,
        polls: u32,
        elapsed: Duration,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("unknown cloud provider: {0}")]
    UnknownProvider(String),
}

impl Error {
    /// Whether this error means the targeted resource does not exist.
    /// Teardown paths treat these as already done rather than fatal.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Gce(e) => e.is_not_found(),
            Error::HetznerApi(message) => message.contains("404"),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Backends with a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderName {
    Hetzner,
    Gce,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hetzner => "hetzner",
            Self::Gce => "gce",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hetzner" => Ok(Self::Hetzner),
            "gce" => Ok(Self::Gce),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Canonical display names for known cloud short ids, used in error and help
/// text. Built once; not every entry has a driver yet.
pub fn display_name(short: &str) -> Option<&'static str> {
    match short {
        "do" => Some("DigitalOcean"),
        "civo" => Some("Civo"),
        "scaleway" => Some("Scaleway"),
        "hetzner" => Some("Hetzner"),
        "linode" => Some("Linode"),
        "ovh" => Some("OVHcloud"),
        "equinix" => Some("Equinix Metal"),
        "gce" => Some("Google Compute Engine"),
        _ => None,
    }
}

/// Uniform lifecycle contract every backend driver satisfies.
///
/// Each driver owns its authenticated client and internally sequences the
/// backend-specific calls, awaiting asynchronous steps through the poller.
/// Callers observe one result type and one failure behavior regardless of
/// backend.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provision an instance plus its attached resources and return a
    /// descriptor built from freshly observed backend state.
    async fn create_server(&self, spec: &ServerSpec) -> Result<ResourceDescriptor>;

    /// Tear down the instance and its attached resources, best-effort:
    /// sub-resources that are already gone are skipped, not fatal.
    async fn delete_server(&self, id: &str, spec: &ServerSpec) -> Result<()>;

    /// All instances carrying the system tag. Order is backend-defined.
    async fn list_servers(&self) -> Result<Vec<ResourceDescriptor>>;

    /// Run the remote update procedure on a provisioned instance.
    async fn update_server(&self, id: &str, spec: &ServerSpec) -> Result<()>;

    /// Backend identifier.
    fn name(&self) -> ProviderName;
}

/// Select and construct the driver for a backend identifier.
///
/// `zone` scopes backends whose API is zone-addressed (GCE); drivers that
/// take the region from the spec ignore it. All orchestration lives in the
/// drivers; this façade only forwards.
pub fn provider_for(
    name: ProviderName,
    zone: &str,
    cancel: CancellationToken,
) -> Result<Box<dyn CloudProvider>> {
    match name {
        ProviderName::Hetzner => Ok(Box::new(
            hetzner::HetznerProvider::from_env()?.with_cancellation(cancel),
        )),
        ProviderName::Gce => Ok(Box::new(
            gce::GceProvider::from_env(zone)?.with_cancellation(cancel),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use types::INSTANCE_TAG;

    fn spec(name: &str) -> ServerSpec {
        ServerSpec {
            name: name.into(),
            region: "fsn1".into(),
            size: "cx22".into(),
            volume_size: 20,
            edition: "java".into(),
            ssh_key_path: PathBuf::from("/tmp/key"),
            extra: HashMap::new(),
        }
    }

    /// In-memory backend exercising the uniform contract end to end.
    struct StubProvider {
        servers: Mutex<Vec<ResourceDescriptor>>,
        next_id: Mutex<u64>,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                servers: Mutex::new(Vec::new()),
                next_id: Mutex::new(1),
            }
        }

        fn seed_untagged(&self, name: &str) {
            self.servers.lock().unwrap().push(ResourceDescriptor {
                id: format!("untagged-{name}"),
                name: name.into(),
                region: "fsn1".into(),
                public_ip: "198.51.100.9".into(),
                tags: "something-else".into(),
            });
        }
    }

    #[async_trait]
    impl CloudProvider for StubProvider {
        async fn create_server(&self, spec: &ServerSpec) -> Result<ResourceDescriptor> {
            let mut next = self.next_id.lock().unwrap();
            let descriptor = ResourceDescriptor {
                id: next.to_string(),
                name: spec.name.clone(),
                region: spec.region.clone(),
                public_ip: "203.0.113.5".into(),
                tags: spec.tag_string(),
            };
            *next += 1;
            self.servers.lock().unwrap().push(descriptor.clone());
            Ok(descriptor)
        }

        async fn delete_server(&self, id: &str, _spec: &ServerSpec) -> Result<()> {
            // Idempotent: deleting an unknown id only takes the missing-
            // resource branch.
            self.servers.lock().unwrap().retain(|s| s.id != id);
            Ok(())
        }

        async fn list_servers(&self) -> Result<Vec<ResourceDescriptor>> {
            Ok(self
                .servers
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.tags.split(',').any(|t| t == INSTANCE_TAG))
                .cloned()
                .collect())
        }

        async fn update_server(&self, id: &str, _spec: &ServerSpec) -> Result<()> {
            let servers = self.servers.lock().unwrap();
            if !servers.iter().any(|s| s.id == id) {
                return Err(Error::NotFound {
                    resource: "server",
                    name: id.to_string(),
                });
            }
            Ok(())
        }

        fn name(&self) -> ProviderName {
            ProviderName::Hetzner
        }
    }

    #[tokio::test]
    async fn create_returns_descriptor_from_observed_state() {
        let provider = StubProvider::new();
        let descriptor = provider.create_server(&spec("srv1")).await.unwrap();

        assert_eq!(descriptor.name, "srv1");
        assert_eq!(descriptor.region, "fsn1");
        assert_eq!(descriptor.public_ip, "203.0.113.5");
        assert_eq!(descriptor.tags, "minectl,java");
    }

    #[tokio::test]
    async fn create_then_list_yields_exactly_one_match() {
        let provider = StubProvider::new();
        provider.seed_untagged("stranger");
        provider.create_server(&spec("srv1")).await.unwrap();

        let listed = provider.list_servers().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "srv1");
    }

    #[tokio::test]
    async fn list_scopes_on_the_system_tag() {
        let provider = StubProvider::new();
        provider.seed_untagged("a");
        provider.create_server(&spec("one")).await.unwrap();
        provider.create_server(&spec("two")).await.unwrap();

        assert_eq!(provider.list_servers().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_twice_does_not_fail() {
        let provider = StubProvider::new();
        let s = spec("srv1");
        let descriptor = provider.create_server(&s).await.unwrap();

        provider.delete_server(&descriptor.id, &s).await.unwrap();
        provider.delete_server(&descriptor.id, &s).await.unwrap();
        assert!(provider.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_on_unknown_id_is_not_found() {
        let provider = StubProvider::new();
        let err = provider.update_server("999", &spec("srv1")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn provider_names_round_trip() {
        assert_eq!("hetzner".parse::<ProviderName>().unwrap(), ProviderName::Hetzner);
        assert_eq!("gce".parse::<ProviderName>().unwrap(), ProviderName::Gce);
        assert!(matches!(
            "aws".parse::<ProviderName>(),
            Err(Error::UnknownProvider(_))
        ));
    }

    #[test]
    fn display_names_cover_the_known_clouds() {
        assert_eq!(display_name("hetzner"), Some("Hetzner"));
        assert_eq!(display_name("gce"), Some("Google Compute Engine"));
        assert_eq!(display_name("equinix"), Some("Equinix Metal"));
        assert_eq!(display_name("nope"), None);
    }
}
