pub mod failover;
pub mod pick;
pub mod registry;

use std::path::Path;

use anyhow::Context;
use clap::Args;
use tracing::debug;

use steer_core::{InstanceInfo, ServiceInstance, SteerConfig};
use steer_state::KvStore;

/// Identity of one instance on the command line.
#[derive(Args, Debug)]
pub struct InstanceArgs {
    pub service: String,
    pub address: String,
    #[arg(short, long, default_value = "")]
    pub group: String,
}

impl InstanceArgs {
    pub fn instance(&self) -> ServiceInstance {
        ServiceInstance::new(&self.service, &self.group, &self.address)
    }
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub instance: InstanceArgs,
    /// Weight for the single-weight policy
    #[arg(long, default_value = "1")]
    pub weight: u32,
    #[arg(long, default_value = "1")]
    pub read_weight: u32,
    #[arg(long, default_value = "1")]
    pub write_weight: u32,
    /// Stable node id; defaults to the address
    #[arg(long)]
    pub node: Option<String>,
    /// Keep a leased registration alive until Ctrl-C instead of writing
    /// a permanent record
    #[arg(long)]
    pub hold: bool,
}

impl RegisterArgs {
    pub fn info(&self) -> InstanceInfo {
        let info = InstanceInfo::new(&self.instance.service, &self.instance.address)
            .with_group(&self.instance.group)
            .with_weight(self.weight)
            .with_read_weight(self.read_weight)
            .with_write_weight(self.write_weight);
        match &self.node {
            Some(node) => info.with_node(node),
            None => info,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<SteerConfig> {
    match path {
        Some(path) => SteerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SteerConfig::default()),
    }
}

/// Open the store named by `config`, creating its directory if needed.
pub fn open_store(config: &SteerConfig) -> anyhow::Result<KvStore> {
    let path = &config.store.path;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating store directory {}", dir.display()))?;
    }
    let store = KvStore::open_with_buffer(path, config.store.event_buffer)
        .with_context(|| format!("opening store {}", path.display()))?;
    debug!(path = %path.display(), "store opened");
    Ok(store)
}
