use std::collections::HashMap;
use std::path::PathBuf;

/// Label every instance created by this tool carries. List and delete
/// operations scope on it so unrelated resources are never touched.
pub const INSTANCE_TAG: &str = "minectl";

/// Desired state for one game-server instance.
///
/// Size, region and volume size are backend-interpretable; only the backend
/// validates them. `extra` carries backend-opaque settings that no uniform
/// field exists for.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    /// Region or zone identifier in the backend's own vocabulary.
    pub region: String,
    /// Machine size/class in the backend's own vocabulary.
    pub size: String,
    /// Game-data volume size in GiB.
    pub volume_size: i64,
    /// Game edition tag, e.g. `java` or `bedrock`.
    pub edition: String,
    /// Path to the private key; the matching `.pub` file must exist.
    pub ssh_key_path: PathBuf,
    pub extra: HashMap<String, String>,
}

impl ServerSpec {
    /// Path of the public half of the keypair.
    pub fn public_key_path(&self) -> PathBuf {
        let mut os = self.ssh_key_path.clone().into_os_string();
        os.push(".pub");
        PathBuf::from(os)
    }

    /// The canonical tag set for this instance, comma-joined.
    pub fn tag_string(&self) -> String {
        format!("{INSTANCE_TAG},{}", self.edition)
    }
}

/// Uniform result for a provisioned instance. Owned by the caller; carries no
/// backend ties after return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Backend-assigned identifier.
    pub id: String,
    pub name: String,
    pub region: String,
    pub public_ip: String,
    /// Comma-joined tag set.
    pub tags: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn spec() -> ServerSpec {
        ServerSpec {
            name: "srv1".into(),
            region: "fsn1".into(),
            size: "cx22".into(),
            volume_size: 20,
            edition: "java".into(),
            ssh_key_path: PathBuf::from("/home/op/.ssh/id_ed25519"),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn public_key_path_appends_pub() {
        assert_eq!(
            spec().public_key_path(),
            Path::new("/home/op/.ssh/id_ed25519.pub")
        );
    }

    #[test]
    fn tag_string_leads_with_instance_tag() {
        assert_eq!(spec().tag_string(), "minectl,java");
    }
}
