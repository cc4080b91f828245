//! Bootstrap payload rendering.
//!
//! Turns a [`ServerSpec`] into the opaque first-boot payload a backend
//! injects as instance user-data/metadata. Two formats exist: a raw shell
//! script (GCE startup-script) and a cloud-init document (Hetzner
//! user-data). Rendering is pure with respect to its inputs; a failure is
//! fatal for the enclosing create.

use crate::types::ServerSpec;
use crate::{Error, Result};
use tera::{Context, Tera};

const BASH_TEMPLATE: &str = include_str!("../templates/bootstrap.sh.tera");
const CLOUD_CONFIG_TEMPLATE: &str = include_str!("../templates/cloud-config.yaml.tera");

/// Which payload format to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Raw shell script, run once on first boot.
    Bash,
    /// Structured cloud-init document.
    CloudConfig,
}

impl TemplateKind {
    fn template_name(self) -> &'static str {
        match self {
            TemplateKind::Bash => "bootstrap.sh",
            TemplateKind::CloudConfig => "cloud-config.yaml",
        }
    }
}

/// Renderer for bootstrap payloads.
///
/// `device` is the block device the game-data volume appears as on the
/// instance (e.g. `sdb`); it differs per backend.
pub struct BootstrapTemplate {
    tera: Tera,
    device: String,
}

impl BootstrapTemplate {
    pub fn new(device: impl Into<String>) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("bootstrap.sh", BASH_TEMPLATE)
            .map_err(Error::Template)?;
        tera.add_raw_template("cloud-config.yaml", CLOUD_CONFIG_TEMPLATE)
            .map_err(Error::Template)?;
        Ok(Self {
            tera,
            device: device.into(),
        })
    }

    pub fn render(&self, spec: &ServerSpec, kind: TemplateKind) -> Result<String> {
        let mut context = Context::new();
        context.insert("name", &spec.name);
        context.insert("edition", &spec.edition);
        context.insert("device", &self.device);
        self.tera
            .render(kind.template_name(), &context)
            .map_err(Error::Template)
    }
}
