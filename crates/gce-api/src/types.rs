use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A zone-scoped long-running operation.
///
/// GCE mutations (disk/instance insert and delete) return one of these; the
/// caller polls it by name until `status` reaches `DONE`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    /// `PENDING`, `RUNNING` or `DONE`.
    pub status: String,
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == "DONE"
    }

    /// First error message attached to the operation, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .and_then(|e| e.errors.first())
            .map(|e| format!("{}: {}", e.code, e.message))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Request body for inserting a persistent disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInsert {
    pub name: String,
    pub size_gb: i64,
    #[serde(rename = "type")]
    pub disk_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskList {
    #[serde(default)]
    pub items: Vec<Disk>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
}

/// Request body for inserting an instance.
///
/// Only the fields the provisioner sets are modeled; everything else is left
/// to API defaults.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInsert {
    pub name: String,
    pub machine_type: String,
    pub disks: Vec<AttachedDisk>,
    pub metadata: Metadata,
    pub scheduling: Scheduling,
    pub network_interfaces: Vec<NetworkInterfaceInsert>,
    pub service_accounts: Vec<ServiceAccount>,
    pub labels: HashMap<String, String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<InitializeParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub source_image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    pub automatic_restart: bool,
    pub on_host_maintenance: String,
    pub preemptible: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceInsert {
    pub network: String,
    pub access_configs: Vec<AccessConfigInsert>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfigInsert {
    #[serde(rename = "type")]
    pub config_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceAccount {
    pub email: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceList {
    #[serde(default)]
    pub items: Vec<Instance>,
}

/// An instance as reported back by the API. Numeric ids come over the wire as
/// decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub tags: Tags,
}

impl Instance {
    /// Public (NAT) address of the first network interface, if assigned.
    pub fn nat_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|nic| nic.access_configs.first())
            .and_then(|ac| ac.nat_ip.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(rename = "natIP", default)]
    pub nat_ip: Option<String>,
}

/// Request body for inserting a firewall rule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallInsert {
    pub name: String,
    pub description: String,
    pub network: String,
    pub allowed: Vec<FirewallAllowed>,
    pub source_ranges: Vec<String>,
    pub direction: String,
    pub target_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallAllowed {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallList {
    #[serde(default)]
    pub items: Vec<Firewall>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Firewall {
    pub name: String,
}

/// OS Login profile for a user: posix accounts plus registered public keys,
/// both addressed by their fully qualified resource `name` on delete.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginProfile {
    #[serde(default)]
    pub posix_accounts: Vec<PosixAccount>,
    #[serde(default)]
    pub ssh_public_keys: HashMap<String, SshPublicKey>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosixAccount {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_done_with_error() {
        let op: Operation = serde_json::from_str(
            r#"{
                "name": "operation-123",
                "status": "DONE",
                "error": {
                    "errors": [{"code": "QUOTA_EXCEEDED", "message": "too many disks"}]
                }
            }"#,
        )
        .unwrap();

        assert!(op.is_done());
        assert_eq!(
            op.error_message().unwrap(),
            "QUOTA_EXCEEDED: too many disks"
        );
    }

    #[test]
    fn operation_pending_has_no_error() {
        let op: Operation =
            serde_json::from_str(r#"{"name": "operation-123", "status": "PENDING"}"#).unwrap();

        assert!(!op.is_done());
        assert!(op.error_message().is_none());
    }

    #[test]
    fn instance_nat_ip_from_first_interface() {
        let instance: Instance = serde_json::from_str(
            r#"{
                "id": "5402888",
                "name": "srv1",
                "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/europe-west1-b",
                "networkInterfaces": [
                    {"accessConfigs": [{"natIP": "203.0.113.5"}]}
                ],
                "tags": {"items": ["minectl", "java"]}
            }"#,
        )
        .unwrap();

        assert_eq!(instance.nat_ip(), Some("203.0.113.5"));
        assert_eq!(instance.tags.items, vec!["minectl", "java"]);
    }

    #[test]
    fn instance_without_access_config_has_no_ip() {
        let instance: Instance =
            serde_json::from_str(r#"{"id": "1", "name": "srv1"}"#).unwrap();

        assert!(instance.nat_ip().is_none());
    }

    #[test]
    fn instance_insert_serializes_camel_case() {
        let insert = InstanceInsert {
            name: "srv1".into(),
            machine_type: "zones/europe-west1-b/machineTypes/e2-medium".into(),
            disks: vec![AttachedDisk {
                auto_delete: Some(true),
                boot: Some(true),
                disk_type: Some("PERSISTENT".into()),
                disk_size_gb: Some(10),
                initialize_params: Some(InitializeParams {
                    source_image: "projects/ubuntu-os-cloud/global/images/x".into(),
                }),
                source: None,
            }],
            metadata: Metadata {
                items: vec![MetadataItem {
                    key: "startup-script".into(),
                    value: "#!/bin/bash".into(),
                }],
            },
            scheduling: Scheduling {
                automatic_restart: true,
                on_host_maintenance: "MIGRATE".into(),
                preemptible: false,
            },
            network_interfaces: vec![],
            service_accounts: vec![],
            labels: HashMap::new(),
            tags: Tags::default(),
        };

        let json = serde_json::to_value(&insert).unwrap();
        assert_eq!(json["machineType"], "zones/europe-west1-b/machineTypes/e2-medium");
        assert_eq!(json["disks"][0]["autoDelete"], true);
        assert_eq!(json["disks"][0]["initializeParams"]["sourceImage"]
            .as_str()
            .unwrap(), "projects/ubuntu-os-cloud/global/images/x");
        // unset optional fields must not appear in the body
        assert!(json["disks"][0].get("source").is_none());
    }

    #[test]
    fn firewall_allowed_uses_ip_protocol_casing() {
        let allowed = FirewallAllowed {
            ip_protocol: "tcp".into(),
        };
        let json = serde_json::to_value(&allowed).unwrap();
        assert_eq!(json["IPProtocol"], "tcp");
    }
}
