use std::sync::Arc;

use steer_core::{ServiceInstance, SteerConfig};
use steer_failover::FailoverCoordinator;

use super::{InstanceArgs, open_store};

fn open_coordinator(config: &SteerConfig) -> anyhow::Result<FailoverCoordinator> {
    let store = open_store(config)?;
    Ok(FailoverCoordinator::from_config(Arc::new(store), &config.failover))
}

pub async fn failover(config: &SteerConfig, args: InstanceArgs) -> anyhow::Result<()> {
    let instance = args.instance();
    open_coordinator(config)?.failover(&instance).await?;
    println!("✓ {instance} marked for failover");
    Ok(())
}

pub async fn recover(config: &SteerConfig, args: InstanceArgs) -> anyhow::Result<()> {
    let instance = args.instance();
    open_coordinator(config)?.recover(&instance).await?;
    println!("✓ {instance} recovered");
    Ok(())
}

pub async fn takeover(
    config: &SteerConfig,
    failed: InstanceArgs,
    candidate: &str,
) -> anyhow::Result<()> {
    let failed = failed.instance();
    let candidate = ServiceInstance::new(&failed.name, &failed.group, candidate);
    if open_coordinator(config)?
        .try_takeover(&failed, &candidate)
        .await?
    {
        println!("✓ {candidate} took over {failed}");
    } else {
        println!("✗ {candidate} lost the takeover race for {failed}");
    }
    Ok(())
}

pub async fn claimant(config: &SteerConfig, args: InstanceArgs) -> anyhow::Result<()> {
    let instance = args.instance();
    match open_coordinator(config)?.claimant(&instance).await? {
        Some(claimant) => println!("{instance} is taken over by {claimant}"),
        None => println!("{instance} has no claimant"),
    }
    Ok(())
}

pub async fn watch(config: &SteerConfig) -> anyhow::Result<()> {
    let coordinator = open_coordinator(config)?;
    let mut events = coordinator.watch_failover().await?;
    println!("Watching {} (Ctrl-C to stop)", config.failover.prefix);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event.claimant {
                    Some(claimant) => println!("{} → {}", event.instance, claimant),
                    None => println!("{} → (undecodable claimant)", event.instance),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }
    coordinator.close();
    Ok(())
}
