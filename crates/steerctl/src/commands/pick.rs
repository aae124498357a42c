use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use steer_balancer::{
    CallContext, DoneInfo, PickInfo, Picker, PickerBuildInfo, PickerBuilder, ReadyConn,
    RwWeightedPickerBuilder, StaticWeightedPickerBuilder, WeightedPickerBuilder,
};
use steer_core::config::BalancerPolicy;
use steer_core::{SteerConfig, Target};
use steer_registry::{KvRegistry, Registry};
use steer_resolver::{ClientConn, ResolveError, ResolveResult, ResolverBuilder, ResolverState};

use super::open_store;

/// Stand-in connection pool: every resolved address is ready at once and
/// its connection is the address itself.
struct PickerSlot {
    builder: Box<dyn PickerBuilder<String>>,
    picker: Mutex<Option<Arc<dyn Picker<String>>>>,
    last_error: Mutex<Option<String>>,
}

impl PickerSlot {
    fn new(policy: BalancerPolicy) -> Self {
        let builder: Box<dyn PickerBuilder<String>> = match policy {
            BalancerPolicy::Weighted => Box::new(WeightedPickerBuilder),
            BalancerPolicy::StaticWeighted => Box::new(StaticWeightedPickerBuilder),
            BalancerPolicy::RwWeighted => Box::new(RwWeightedPickerBuilder::new()),
        };
        Self {
            builder,
            picker: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    fn picker(&self) -> Option<Arc<dyn Picker<String>>> {
        self.picker.lock().clone()
    }
}

impl ClientConn for PickerSlot {
    fn update_state(&self, state: ResolverState) -> ResolveResult<()> {
        let ready = state
            .addresses
            .into_iter()
            .map(|address| ReadyConn {
                conn: address.addr.clone(),
                address,
            })
            .collect();
        let picker = self.builder.build(PickerBuildInfo::new(ready));
        *self.picker.lock() = Some(picker);
        Ok(())
    }

    fn report_error(&self, error: ResolveError) {
        warn!(error = %error, "resolution failed");
        *self.last_error.lock() = Some(error.to_string());
    }
}

fn run_picks(
    picker: &dyn Picker<String>,
    ctx: &CallContext,
    count: usize,
) -> anyhow::Result<BTreeMap<String, usize>> {
    let mut distribution = BTreeMap::new();
    for _ in 0..count {
        let result = picker.pick(PickInfo::new("/steerctl/Pick", ctx))?;
        *distribution.entry(result.conn).or_default() += 1;
        (result.done)(DoneInfo::success());
    }
    Ok(distribution)
}

async fn resolve_picker(
    config: &SteerConfig,
    registry: Arc<dyn Registry>,
    service: &str,
) -> anyhow::Result<Arc<dyn Picker<String>>> {
    let slot = Arc::new(PickerSlot::new(config.balancer.policy));
    let resolver = ResolverBuilder::from_config(registry, &config.resolver)?
        .build(
            &Target::for_service(&config.resolver.scheme, service),
            slot.clone(),
        )
        .await?;
    resolver.close();

    match slot.picker() {
        Some(picker) => Ok(picker),
        None => {
            let reason = slot.last_error.lock().take().unwrap_or_default();
            anyhow::bail!("resolving {service} failed: {reason}")
        }
    }
}

pub async fn pick(
    config: &SteerConfig,
    service: &str,
    count: usize,
    write: bool,
    group: Option<String>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let registry = Arc::new(KvRegistry::from_config(Arc::new(store), &config.registry)?);
    let picker = resolve_picker(config, registry.clone(), service).await;
    registry.close();
    let picker = picker?;

    let mut ctx = if write {
        CallContext::write()
    } else {
        CallContext::read()
    };
    if let Some(group) = group {
        ctx = ctx.with_group(group);
    }

    let distribution = run_picks(picker.as_ref(), &ctx, count)?;
    println!(
        "{count} {} picks for {service} ({:?}):",
        if write { "write" } else { "read" },
        config.balancer.policy
    );
    for (address, picks) in &distribution {
        println!("  {address:<24} {picks:>6}  {:>5.1}%", *picks as f64 * 100.0 / count as f64);
    }
    Ok(())
}
