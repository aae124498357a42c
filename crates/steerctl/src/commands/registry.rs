use std::sync::Arc;

use steer_core::SteerConfig;
use steer_registry::{KvRegistry, Registry};

use super::{RegisterArgs, open_store};

fn open_registry(config: &SteerConfig) -> anyhow::Result<KvRegistry> {
    let store = open_store(config)?;
    Ok(KvRegistry::from_config(Arc::new(store), &config.registry)?)
}

pub async fn register(config: &SteerConfig, args: RegisterArgs) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let info = args.info();
    if !args.hold {
        // This process exits right away, so nothing would renew a lease.
        let registry = registry.without_lease();
        registry.register(&info).await?;
        println!("✓ Registered {} at {}", info.name, info.address);
        return Ok(());
    }

    registry.register(&info).await?;
    println!(
        "✓ Registered {} at {} (lease {:?}, Ctrl-C to release)",
        info.name,
        info.address,
        registry.lease_ttl()
    );
    tokio::signal::ctrl_c().await?;
    registry.revoke().await;
    println!("✓ Released {} at {}", info.name, info.address);
    Ok(())
}

pub async fn unregister(config: &SteerConfig, service: &str, address: &str) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    registry
        .unregister(&steer_core::InstanceInfo::new(service, address))
        .await?;
    println!("✓ Unregistered {service} at {address}");
    Ok(())
}

pub async fn list(config: &SteerConfig, service: &str, format: &str) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let mut instances = registry.list_service(service).await?;
    instances.sort_by(|a, b| a.address.cmp(&b.address));

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&instances)?),
        "text" => {
            if instances.is_empty() {
                println!("No instances registered for {service}");
            }
            for i in &instances {
                println!(
                    "{:<24} group={:<10} node={:<16} weight={} read={} write={}",
                    i.address,
                    if i.group.is_empty() { "-" } else { i.group.as_str() },
                    i.node_id(),
                    i.weight,
                    i.read_weight,
                    i.write_weight
                );
            }
        }
        other => anyhow::bail!("unknown format {other:?}, expected text or json"),
    }
    Ok(())
}
