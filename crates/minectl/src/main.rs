use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use minectl_cloud::types::ServerSpec;
use minectl_cloud::{ProviderName, display_name, provider_for};

#[derive(Parser)]
#[command(name = "minectl", about = "Provision game servers across clouds", version)]
struct Cli {
    /// Backend short id (hetzner, gce).
    #[arg(long, global = true, default_value = "hetzner")]
    cloud: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Args)]
struct SpecArgs {
    /// Instance name, unique per backend and region.
    #[arg(long)]
    name: String,

    /// Region or zone in the backend's vocabulary.
    #[arg(long)]
    region: String,

    /// Machine size/class in the backend's vocabulary.
    #[arg(long, default_value = "cx22")]
    size: String,

    /// Game-data volume size in GiB.
    #[arg(long, default_value_t = 20)]
    volume_size: i64,

    /// Game edition tag (java or bedrock).
    #[arg(long, default_value = "java")]
    edition: String,

    /// Path to the private SSH key; the matching .pub must exist.
    #[arg(long)]
    ssh_key: PathBuf,
}

impl From<SpecArgs> for ServerSpec {
    fn from(args: SpecArgs) -> Self {
        ServerSpec {
            name: args.name,
            region: args.region,
            size: args.size,
            volume_size: args.volume_size,
            edition: args.edition,
            ssh_key_path: args.ssh_key,
            extra: HashMap::new(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create an instance plus its volume, firewall rule and SSH key.
    Create {
        #[command(flatten)]
        spec: SpecArgs,
    },
    /// Tear down an instance and its attached resources.
    Delete {
        /// Backend-assigned instance id.
        #[arg(long)]
        id: String,
        #[command(flatten)]
        spec: SpecArgs,
    },
    /// List instances created by this tool.
    List {
        /// Zone to list, for zone-addressed backends.
        #[arg(long, default_value = "")]
        region: String,
    },
    /// Run the remote update procedure on a running instance.
    Update {
        /// Backend-assigned instance id.
        #[arg(long)]
        id: String,
        #[command(flatten)]
        spec: SpecArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let provider_name: ProviderName = cli.cloud.parse().with_context(|| {
        match display_name(&cli.cloud) {
            Some(full) => format!("{full} ({}) has no driver yet", cli.cloud),
            None => format!("{} is not a known cloud short id", cli.cloud),
        }
    })?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, aborting at the next poll");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Create { spec } => {
            let spec: ServerSpec = spec.into();
            let provider = provider_for(provider_name, &spec.region, cancel)?;
            let server = provider.create_server(&spec).await?;
            println!(
                "created {} ({}) in {} at {} [{}]",
                server.name, server.id, server.region, server.public_ip, server.tags
            );
        }
        Command::Delete { id, spec } => {
            let spec: ServerSpec = spec.into();
            let provider = provider_for(provider_name, &spec.region, cancel)?;
            provider.delete_server(&id, &spec).await?;
            println!("deleted {} ({id})", spec.name);
        }
        Command::List { region } => {
            let provider = provider_for(provider_name, &region, cancel)?;
            for server in provider.list_servers().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    server.id, server.name, server.region, server.public_ip, server.tags
                );
            }
        }
        Command::Update { id, spec } => {
            let spec: ServerSpec = spec.into();
            let provider = provider_for(provider_name, &spec.region, cancel)?;
            provider.update_server(&id, &spec).await?;
            println!("updated {} ({id})", spec.name);
        }
    }

    Ok(())
}
