//! Single-weight pickers: adaptive, and fixed for callers that want
//! plain SWRR with no feedback.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::PickError;
use crate::node::WeightTrack;
use crate::picker::{DoneInfo, PickInfo, PickResult, Picker, PickerBuildInfo, PickerBuilder};

struct WeightedNode<C> {
    conn: C,
    track: Mutex<WeightTrack>,
}

/// SWRR over each address's `weight` attribute.
pub struct WeightedPicker<C> {
    nodes: Vec<Arc<WeightedNode<C>>>,
    /// When false, done reports are ignored and weights never move.
    adaptive: bool,
}

impl<C> WeightedPicker<C> {
    /// Build from `(connection, configured weight)` pairs, in pick order.
    pub fn new(nodes: impl IntoIterator<Item = (C, u32)>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|(conn, weight)| {
                Arc::new(WeightedNode {
                    conn,
                    track: Mutex::new(WeightTrack::new(weight)),
                })
            })
            .collect();
        Self {
            nodes,
            adaptive: true,
        }
    }

    /// Like `new`, but efficient weights stay at their configured values.
    pub fn fixed(nodes: impl IntoIterator<Item = (C, u32)>) -> Self {
        Self {
            adaptive: false,
            ..Self::new(nodes)
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy of every node's weight state, in pick order.
    pub fn snapshot(&self) -> Vec<WeightTrack> {
        self.nodes.iter().map(|node| node.track.lock().clone()).collect()
    }
}

impl<C> Picker<C> for WeightedPicker<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn pick(&self, _info: PickInfo<'_>) -> Result<PickResult<C>, PickError> {
        let mut total = 0;
        let mut selected: Option<(&Arc<WeightedNode<C>>, i64)> = None;
        for node in &self.nodes {
            let mut track = node.track.lock();
            total += track.advance();
            let current = track.current();
            if selected.is_none_or(|(_, best)| current > best) {
                selected = Some((node, current));
            }
        }
        let (node, _) = selected.ok_or(PickError::NoBackendAvailable)?;
        node.track.lock().settle(total);

        if !self.adaptive {
            return Ok(PickResult {
                conn: node.conn.clone(),
                done: Box::new(|_: DoneInfo| {}),
            });
        }
        let node = Arc::clone(node);
        Ok(PickResult {
            conn: node.conn.clone(),
            done: Box::new(move |done: DoneInfo| node.track.lock().record(done.outcome())),
        })
    }
}

/// Builds a `WeightedPicker` per ready set. Addresses without a weight
/// attribute count as weight 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedPickerBuilder;

impl<C> PickerBuilder<C> for WeightedPickerBuilder
where
    C: Clone + Send + Sync + 'static,
{
    fn build(&self, info: PickerBuildInfo<C>) -> Arc<dyn Picker<C>> {
        let picker = WeightedPicker::new(
            info.ready
                .into_iter()
                .map(|ready| (ready.conn, ready.address.attributes.weight.unwrap_or(1))),
        );
        debug!(nodes = picker.len(), "built weighted picker");
        Arc::new(picker)
    }
}

/// Builds a fixed `WeightedPicker` per ready set. Weight defaults match
/// `WeightedPickerBuilder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticWeightedPickerBuilder;

impl<C> PickerBuilder<C> for StaticWeightedPickerBuilder
where
    C: Clone + Send + Sync + 'static,
{
    fn build(&self, info: PickerBuildInfo<C>) -> Arc<dyn Picker<C>> {
        let picker = WeightedPicker::fixed(
            info.ready
                .into_iter()
                .map(|ready| (ready.conn, ready.address.attributes.weight.unwrap_or(1))),
        );
        debug!(nodes = picker.len(), "built static weighted picker");
        Arc::new(picker)
    }
}
