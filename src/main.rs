use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lfs_endpoint::{Config, LfsServer};

/// Git LFS server with Git smart-HTTP passthrough.
#[derive(Debug, Parser)]
#[command(name = "lfs-endpoint", version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file and $PORT)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory containing the Git repositories
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Public base URL used in transfer links
    #[arg(long)]
    server_url: Option<String>,

    /// Reject uploads whose SHA256 does not match the OID
    #[arg(long)]
    verify_content: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid PORT {:?}", port))?;
            config.bind_addr.set_port(port);
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(root) = self.project_root {
            config.project_root = root;
        }
        if let Some(url) = self.server_url {
            config.server_url = url;
        }
        config.verify_content |= self.verify_content;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Cli::parse().into_config()?;
    LfsServer::new(config)?.serve().await?;
    Ok(())
}
