//! Read/write split, group-aware adaptive picker.
//!
//! Each node carries two independent weight tracks. A call is first
//! filtered to the nodes of its requested group, then SWRR runs over the
//! read or write track depending on the call's write intent.
//!
//! Rebuilds go through a [`NodeCache`] keyed by node id, so a node whose
//! configured weights did not change keeps its adaptive state (including
//! any penalty) across re-resolutions. Nodes whose weights changed start
//! over; nodes that disappeared are evicted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::PickError;
use crate::node::WeightTrack;
use crate::picker::{DoneInfo, PickInfo, PickResult, Picker, PickerBuildInfo, PickerBuilder};

struct RwNode<C> {
    id: String,
    state: Mutex<RwNodeState<C>>,
}

struct RwNodeState<C> {
    conn: C,
    group: String,
    read: WeightTrack,
    write: WeightTrack,
}

impl<C> RwNodeState<C> {
    fn track_mut(&mut self, write: bool) -> &mut WeightTrack {
        if write { &mut self.write } else { &mut self.read }
    }
}

impl<C> RwNode<C> {
    fn new(id: String, conn: C, group: String, read: u32, write: u32) -> Self {
        Self {
            id,
            state: Mutex::new(RwNodeState {
                conn,
                group,
                read: WeightTrack::new(read),
                write: WeightTrack::new(write),
            }),
        }
    }

    /// Adopt a new connection handle and group if the configured weights
    /// are unchanged. Returns false when the node must be rebuilt.
    fn refresh(&self, conn: C, group: &str, read: u32, write: u32) -> bool {
        let mut state = self.state.lock();
        if !state.read.is_configured_as(read) || !state.write.is_configured_as(write) {
            return false;
        }
        state.conn = conn;
        if state.group != group {
            state.group = group.to_string();
        }
        true
    }

    fn snapshot(&self) -> RwNodeSnapshot {
        let state = self.state.lock();
        RwNodeSnapshot {
            id: self.id.clone(),
            group: state.group.clone(),
            read: state.read.clone(),
            write: state.write.clone(),
        }
    }
}

/// Point-in-time copy of one node's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RwNodeSnapshot {
    pub id: String,
    pub group: String,
    pub read: WeightTrack,
    pub write: WeightTrack,
}

pub struct RwWeightedPicker<C> {
    nodes: Vec<Arc<RwNode<C>>>,
}

impl<C> RwWeightedPicker<C> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn snapshot(&self) -> Vec<RwNodeSnapshot> {
        self.nodes.iter().map(|node| node.snapshot()).collect()
    }
}

impl<C> Picker<C> for RwWeightedPicker<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn pick(&self, info: PickInfo<'_>) -> Result<PickResult<C>, PickError> {
        if self.nodes.is_empty() {
            return Err(PickError::NoBackendAvailable);
        }
        let group = info.ctx.group();
        let write = info.ctx.is_write();

        let mut total = 0;
        let mut selected: Option<(&Arc<RwNode<C>>, i64)> = None;
        for node in &self.nodes {
            let mut state = node.state.lock();
            if state.group != group {
                continue;
            }
            let track = state.track_mut(write);
            total += track.advance();
            let current = track.current();
            if selected.is_none_or(|(_, best)| current > best) {
                selected = Some((node, current));
            }
        }
        let Some((node, _)) = selected else {
            return Err(PickError::NoMatchingGroup {
                group: group.to_string(),
            });
        };

        let conn = {
            let mut state = node.state.lock();
            state.track_mut(write).settle(total);
            state.conn.clone()
        };
        let node = Arc::clone(node);
        Ok(PickResult {
            conn,
            done: Box::new(move |done: DoneInfo| {
                node.state.lock().track_mut(write).record(done.outcome());
            }),
        })
    }
}

/// Node records carried between rebuilds, keyed by node id.
pub struct NodeCache<C> {
    nodes: Mutex<HashMap<String, Arc<RwNode<C>>>>,
}

impl<C> NodeCache<C> {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.lock().contains_key(id)
    }
}

impl<C> Default for NodeCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds `RwWeightedPicker`s, reusing node state through its cache.
///
/// Addresses without both read and write weight attributes are skipped.
/// A missing group attribute means the empty group; a missing node id
/// falls back to the address.
pub struct RwWeightedPickerBuilder<C> {
    cache: Arc<NodeCache<C>>,
}

impl<C> RwWeightedPickerBuilder<C> {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(NodeCache::new()))
    }

    pub fn with_cache(cache: Arc<NodeCache<C>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<NodeCache<C>> {
        &self.cache
    }

    /// Build the concrete picker type; `PickerBuilder::build` erases it.
    pub fn build_picker(&self, info: PickerBuildInfo<C>) -> RwWeightedPicker<C>
    where
        C: Clone,
    {
        let mut cache = self.cache.nodes.lock();
        let mut seen = HashSet::with_capacity(info.ready.len());
        let mut nodes = Vec::with_capacity(info.ready.len());
        let (mut reused, mut fresh) = (0usize, 0usize);

        for ready in info.ready {
            let attributes = &ready.address.attributes;
            let (Some(read), Some(write)) = (attributes.read_weight, attributes.write_weight)
            else {
                debug!(addr = %ready.address.addr, "address has no read/write weights, skipped");
                continue;
            };
            let group = attributes.group.clone().unwrap_or_default();
            let id = attributes
                .node
                .clone()
                .unwrap_or_else(|| ready.address.addr.clone());
            if !seen.insert(id.clone()) {
                warn!(node = %id, addr = %ready.address.addr, "duplicate node id, skipped");
                continue;
            }

            let reusable = cache
                .get(&id)
                .filter(|node| node.refresh(ready.conn.clone(), &group, read, write))
                .cloned();
            let node = match reusable {
                Some(node) => {
                    reused += 1;
                    node
                }
                None => {
                    fresh += 1;
                    let node = Arc::new(RwNode::new(id.clone(), ready.conn, group, read, write));
                    cache.insert(id, Arc::clone(&node));
                    node
                }
            };
            nodes.push(node);
        }

        let before = cache.len();
        cache.retain(|id, _| seen.contains(id));
        debug!(
            nodes = nodes.len(),
            reused,
            fresh,
            evicted = before - cache.len(),
            "built read/write weighted picker"
        );
        RwWeightedPicker { nodes }
    }
}

impl<C> Default for RwWeightedPickerBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PickerBuilder<C> for RwWeightedPickerBuilder<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn build(&self, info: PickerBuildInfo<C>) -> Arc<dyn Picker<C>> {
        Arc::new(self.build_picker(info))
    }
}
