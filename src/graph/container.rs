use std::collections::BTreeMap;

/// Arena index of a node owned by a [`Pipeline`](crate::graph::pipeline::Pipeline).
/// Indices are never reused, so a handle to a removed node stays dead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// Which slot of the consumer an edge feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    Input(u32),
    Mask,
}

/// A downstream consumer of a producer's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub node: NodeId,
    pub port: Port,
}

/// Ordered outgoing edges of a producer. Delivery follows insertion order.
#[derive(Clone, Debug, Default)]
pub struct TargetContainer {
    targets: Vec<Target>,
}

impl TargetContainer {
    /// Add `target` unless the same edge already exists. Returns whether it was added.
    pub fn append(&mut self, target: Target) -> bool {
        if self.targets.contains(&target) {
            return false;
        }
        self.targets.push(target);
        true
    }

    pub fn remove(&mut self, target: Target) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| *t != target);
        before != self.targets.len()
    }

    /// Remove every edge into `node` and return them.
    pub fn remove_node(&mut self, node: NodeId) -> Vec<Target> {
        let (removed, kept) = self.targets.iter().copied().partition(|t| t.node == node);
        self.targets = kept;
        removed
    }

    pub fn take_all(&mut self) -> Vec<Target> {
        std::mem::take(&mut self.targets)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn as_slice(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Upstream producers of a consumer, by input index, plus the mask producer.
#[derive(Clone, Debug, Default)]
pub struct SourceContainer {
    inputs: BTreeMap<u32, NodeId>,
    mask: Option<NodeId>,
}

impl SourceContainer {
    /// Record `source` at `index`, returning the producer it replaced.
    pub fn insert(&mut self, index: u32, source: NodeId) -> Option<NodeId> {
        self.inputs.insert(index, source)
    }

    pub fn get(&self, index: u32) -> Option<NodeId> {
        self.inputs.get(&index).copied()
    }

    pub fn remove_at(&mut self, index: u32) -> Option<NodeId> {
        self.inputs.remove(&index)
    }

    /// Lowest index below `maximum` with no producer attached.
    pub fn next_available_index(&self, maximum: u32) -> Option<u32> {
        (0..maximum).find(|i| !self.inputs.contains_key(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, NodeId)> + '_ {
        self.inputs.iter().map(|(i, s)| (*i, *s))
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn mask(&self) -> Option<NodeId> {
        self.mask
    }

    pub fn set_mask(&mut self, mask: Option<NodeId>) -> Option<NodeId> {
        std::mem::replace(&mut self.mask, mask)
    }
}
