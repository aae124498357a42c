//! Registry → resolver → picker builder → picker, end to end.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use steer_balancer::{
    CallContext, DoneInfo, PickError, PickInfo, Picker, PickerBuildInfo, PickerBuilder, ReadyConn,
    RwWeightedPickerBuilder,
};
use steer_core::{InstanceInfo, Target};
use steer_registry::{KvRegistry, Registry};
use steer_resolver::{ClientConn, ResolveError, ResolveResult, ResolverBuilder, ResolverState};
use steer_state::KvStore;

/// A connection pool stand-in: every address is immediately ready and its
/// "connection" is the address string.
struct Pool {
    builder: RwWeightedPickerBuilder<String>,
    picker: Mutex<Option<Arc<dyn Picker<String>>>>,
    generation: Mutex<usize>,
    updated: Notify,
}

impl Pool {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            builder: RwWeightedPickerBuilder::new(),
            picker: Mutex::new(None),
            generation: Mutex::new(0),
            updated: Notify::new(),
        })
    }

    fn picker(&self) -> Arc<dyn Picker<String>> {
        self.picker.lock().clone().unwrap()
    }

    fn generation(&self) -> usize {
        *self.generation.lock()
    }

    async fn wait_for_generation(&self, generation: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = self.updated.notified();
                if self.generation() >= generation {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap();
    }
}

impl ClientConn for Pool {
    fn update_state(&self, state: ResolverState) -> ResolveResult<()> {
        let ready = state
            .addresses
            .into_iter()
            .map(|address| ReadyConn {
                conn: address.addr.clone(),
                address,
            })
            .collect();
        *self.picker.lock() = Some(self.builder.build(PickerBuildInfo::new(ready)));
        *self.generation.lock() += 1;
        self.updated.notify_waiters();
        Ok(())
    }

    fn report_error(&self, error: ResolveError) {
        panic!("unexpected resolver error: {error}");
    }
}

fn pick(picker: &dyn Picker<String>, ctx: &CallContext) -> Result<String, PickError> {
    picker
        .pick(PickInfo::new("/notify.Notifier/Send", ctx))
        .map(|result| result.conn)
}

#[tokio::test]
async fn groups_and_weights_flow_from_registry_to_picks() {
    let store = KvStore::open_in_memory().unwrap();
    let registry = Arc::new(KvRegistry::new(Arc::new(store), "/notification"));
    registry
        .register(
            &InstanceInfo::new("notify", "10.0.0.1:80")
                .with_group("a")
                .with_read_weight(3),
        )
        .await
        .unwrap();
    registry
        .register(&InstanceInfo::new("notify", "10.0.0.2:80").with_group("b"))
        .await
        .unwrap();

    let pool = Pool::new();
    let builder = ResolverBuilder::new(registry.clone(), Duration::from_secs(1));
    let resolver = builder
        .build(&Target::parse("registry:///notify").unwrap(), pool.clone())
        .await
        .unwrap();
    assert_eq!(pool.generation(), 1);

    let picker = pool.picker();
    for _ in 0..10 {
        let ctx = CallContext::read().with_group("b");
        assert_eq!(pick(picker.as_ref(), &ctx).unwrap(), "10.0.0.2:80");
    }
    assert_eq!(
        pick(picker.as_ref(), &CallContext::read()),
        Err(PickError::NoMatchingGroup {
            group: String::new()
        })
    );

    // A new ungrouped instance shows up after the next re-resolution.
    registry
        .register(&InstanceInfo::new("notify", "10.0.0.3:80"))
        .await
        .unwrap();
    pool.wait_for_generation(2).await;
    assert_eq!(
        pick(pool.picker().as_ref(), &CallContext::write()).unwrap(),
        "10.0.0.3:80"
    );

    resolver.close();
}

#[tokio::test]
async fn penalties_survive_unrelated_membership_changes() {
    let store = KvStore::open_in_memory().unwrap();
    let registry = Arc::new(KvRegistry::new(Arc::new(store), "/notification"));
    let slow = InstanceInfo::new("notify", "10.0.0.1:80").with_read_weight(4);
    registry.register(&slow).await.unwrap();

    let pool = Pool::new();
    let builder = ResolverBuilder::new(registry.clone(), Duration::from_secs(1));
    let _resolver = builder
        .build(&Target::parse("registry:///notify").unwrap(), pool.clone())
        .await
        .unwrap();

    for _ in 0..3 {
        let result = pool
            .picker()
            .pick(PickInfo::new("/notify.Notifier/Send", &CallContext::read()))
            .unwrap();
        (result.done)(DoneInfo::deadline_exceeded());
    }

    registry
        .register(&InstanceInfo::new("notify", "10.0.0.2:80"))
        .await
        .unwrap();
    pool.wait_for_generation(2).await;

    let node = pool
        .builder
        .build_picker(PickerBuildInfo::new(vec![ReadyConn {
            conn: slow.address.clone(),
            address: slow.to_address(),
        }]))
        .snapshot()
        .remove(0);
    assert_eq!(node.id, "10.0.0.1:80");
    assert_eq!(node.read.efficient(), 1);
}
