use std::any::Any;
use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use crate::foundation::core::GlSize;
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::ImageOrientation;
use crate::graph::container::{NodeId, Port, SourceContainer, Target, TargetContainer};
use crate::graph::node::{Node, NodeContext};
use crate::render::backend::{BackendKind, FrameRGBA, RenderBackend, create_backend};
use crate::render::cache::FramebufferCache;
use crate::render::framebuffer::{Framebuffer, FramebufferId, FramebufferTiming};
use crate::render::programs::ProgramLibrary;
use crate::render::shader::{ShaderProgram, ShaderSource};

/// Options for building a [`Pipeline`].
#[derive(Clone, Debug, Default)]
pub struct PipelineOpts {
    /// Backend the pipeline renders with.
    pub backend: BackendKind,
}

/// Counters describing graph traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Framebuffers handed to a node input or mask.
    pub deliveries: u64,
    /// Framebuffers emitted by nodes (renders and passthroughs).
    pub outputs: u64,
    /// Deliveries addressed to nodes that no longer exist.
    pub undeliverable: u64,
}

struct NodeEntry {
    node: Box<dyn Node>,
    targets: TargetContainer,
    sources: SourceContainer,
}

struct Delivery {
    target: Target,
    framebuffer: FramebufferId,
}

/// One rendering context: the backend, the framebuffer cache shared by every node, and
/// the graph of nodes.
///
/// A pipeline is confined to one thread. Mutating calls from any other thread panic;
/// use a [`ProcessingQueue`](crate::graph::queue::ProcessingQueue) to reach it from
/// elsewhere.
pub struct Pipeline {
    backend: Box<dyn RenderBackend>,
    cache: FramebufferCache,
    programs: ProgramLibrary,
    nodes: Vec<Option<NodeEntry>>,
    owner: ThreadId,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            backend,
            cache: FramebufferCache::new(),
            programs: ProgramLibrary::new(),
            nodes: Vec::new(),
            owner: thread::current().id(),
            stats: PipelineStats::default(),
        }
    }

    pub fn with_opts(opts: PipelineOpts) -> LumaResult<Self> {
        Ok(Self::new(create_backend(opts.backend)?))
    }

    /// Pipeline on the CPU reference backend.
    pub fn cpu() -> Self {
        Self::new(Box::new(crate::render::cpu::CpuBackend::new(
            crate::render::cpu::CpuBackendOpts::default(),
        )))
    }

    #[track_caller]
    fn assert_confined(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "pipeline used off its processing thread"
        );
    }

    pub(crate) fn bind_to_current_thread(&mut self) {
        self.owner = thread::current().id();
    }

    pub fn is_confined_to_current_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn cache(&self) -> &FramebufferCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FramebufferCache {
        self.assert_confined();
        &mut self.cache
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.assert_confined();
        self.backend.as_mut()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn live_textures(&self) -> usize {
        self.backend.live_textures()
    }

    /// Compile `source` through this context's program cache.
    pub fn program(&mut self, source: &ShaderSource) -> LumaResult<ShaderProgram> {
        self.assert_confined();
        self.programs.program(self.backend.as_mut(), source)
    }

    // ---- nodes -------------------------------------------------------------

    pub fn add_node<N: Node>(&mut self, node: N) -> NodeId {
        self.assert_confined();
        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!(node = node.label(), ?id, "node added");
        self.nodes.push(Some(NodeEntry {
            node: Box::new(node),
            targets: TargetContainer::default(),
            sources: SourceContainer::default(),
        }));
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    fn entry(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn require(&self, id: NodeId) -> LumaResult<&NodeEntry> {
        self.entry(id)
            .ok_or_else(|| LumaError::validation(format!("unknown node {id:?}")))
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.entry(id).map(|e| e.node.label())
    }

    /// Typed view of a node.
    pub fn node<T: Node>(&self, id: NodeId) -> Option<&T> {
        let node: &dyn Any = &*self.entry(id)?.node;
        node.downcast_ref::<T>()
    }

    pub fn node_mut<T: Node>(&mut self, id: NodeId) -> Option<&mut T> {
        self.assert_confined();
        let node: &mut dyn Any = &mut *self.entry_mut(id)?.node;
        node.downcast_mut::<T>()
    }

    /// Run `f` on node `id` with render access. Fails when the node is missing or not a `T`.
    pub fn with_node<T: Node, R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut T, &mut NodeContext<'_>) -> R,
    ) -> LumaResult<R> {
        self.assert_confined();
        let Pipeline {
            nodes,
            cache,
            backend,
            programs,
            ..
        } = self;
        let entry = nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| LumaError::validation(format!("unknown node {id:?}")))?;
        let node: &mut dyn Any = &mut *entry.node;
        let node = node.downcast_mut::<T>().ok_or_else(|| {
            LumaError::validation(format!(
                "node {id:?} is not a {}",
                std::any::type_name::<T>()
            ))
        })?;
        let mut ctx = NodeContext {
            cache,
            backend: backend.as_mut(),
            programs,
            node: id,
        };
        let out = f(node, &mut ctx);
        self.release_retired_textures();
        Ok(out)
    }

    fn with_dyn_node<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut dyn Node, &mut NodeContext<'_>) -> R,
    ) -> Option<R> {
        let Pipeline {
            nodes,
            cache,
            backend,
            programs,
            ..
        } = self;
        let entry = nodes.get_mut(id.0 as usize).and_then(Option::as_mut)?;
        let mut ctx = NodeContext {
            cache,
            backend: backend.as_mut(),
            programs,
            node: id,
        };
        Some(f(&mut *entry.node, &mut ctx))
    }

    // ---- wiring ------------------------------------------------------------

    /// Connect `source` to input `index` of `target`. A producer already attached at that
    /// slot is disconnected first.
    pub fn add_target(&mut self, source: NodeId, target: NodeId, index: u32) -> LumaResult<()> {
        self.assert_confined();
        self.require(source)?;
        let max = self.require(target)?.node.maximum_inputs();
        if index >= max {
            return Err(LumaError::validation(format!(
                "input index {index} out of range for `{}` with {max} inputs",
                self.label(target).unwrap_or("?")
            )));
        }
        if let Some(previous) = self.entry(target).and_then(|e| e.sources.get(index)) {
            if previous == source {
                return Ok(());
            }
            self.remove_source_at_index(target, index);
        }

        if let Some(e) = self.entry_mut(source) {
            e.targets.append(Target {
                node: target,
                port: Port::Input(index),
            });
        }
        if let Some(e) = self.entry_mut(target) {
            e.sources.insert(index, source);
        }
        tracing::trace!(?source, ?target, index, "edge added");
        Ok(())
    }

    /// Connect `source` to the lowest free input of `target` and return that index.
    pub fn add_target_at_next_index(&mut self, source: NodeId, target: NodeId) -> LumaResult<u32> {
        let entry = self.require(target)?;
        let index = entry
            .sources
            .next_available_index(entry.node.maximum_inputs())
            .ok_or_else(|| {
                LumaError::validation(format!(
                    "`{}` has no free input",
                    entry.node.label()
                ))
            })?;
        self.add_target(source, target, index)?;
        Ok(index)
    }

    /// Connect each node to the next one, like writing `a --> b --> c`.
    pub fn chain(&mut self, nodes: &[NodeId]) -> LumaResult<()> {
        for pair in nodes.windows(2) {
            self.add_target_at_next_index(pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn targets(&self, source: NodeId) -> Vec<Target> {
        self.entry(source)
            .map(|e| e.targets.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn sources(&self, target: NodeId) -> Vec<(u32, NodeId)> {
        self.entry(target)
            .map(|e| e.sources.iter().collect())
            .unwrap_or_default()
    }

    /// Disconnect whatever feeds input `index` of `target`, releasing the framebuffer the
    /// target holds in that slot.
    pub fn remove_source_at_index(&mut self, target: NodeId, index: u32) {
        self.assert_confined();
        let Some(source) = self.entry_mut(target).and_then(|e| e.sources.remove_at(index)) else {
            return;
        };
        if let Some(e) = self.entry_mut(source) {
            e.targets.remove(Target {
                node: target,
                port: Port::Input(index),
            });
        }
        self.with_dyn_node(target, |node, ctx| node.source_removed(index, ctx));
        self.release_retired_textures();
    }

    /// Disconnect every edge from `source` to `target`.
    pub fn remove_target(&mut self, source: NodeId, target: NodeId) {
        self.assert_confined();
        let removed = self
            .entry_mut(source)
            .map(|e| e.targets.remove_node(target))
            .unwrap_or_default();
        for edge in removed {
            self.detach_edge(source, edge);
        }
        self.release_retired_textures();
    }

    pub fn remove_all_targets(&mut self, source: NodeId) {
        self.assert_confined();
        let removed = self
            .entry_mut(source)
            .map(|e| e.targets.take_all())
            .unwrap_or_default();
        for edge in removed {
            self.detach_edge(source, edge);
        }
        self.release_retired_textures();
    }

    fn detach_edge(&mut self, source: NodeId, edge: Target) {
        match edge.port {
            Port::Input(index) => {
                let owned = self
                    .entry(edge.node)
                    .and_then(|e| e.sources.get(index))
                    .is_some_and(|s| s == source);
                if owned {
                    if let Some(e) = self.entry_mut(edge.node) {
                        e.sources.remove_at(index);
                    }
                    self.with_dyn_node(edge.node, |node, ctx| node.source_removed(index, ctx));
                }
            }
            Port::Mask => {
                if let Some(e) = self.entry_mut(edge.node) {
                    e.sources.set_mask(None);
                }
                self.with_dyn_node(edge.node, |node, ctx| node.mask_attached(false, ctx));
            }
        }
    }

    /// Attach `mask` as the mask producer of `operation`, or detach the current one.
    pub fn set_mask(&mut self, operation: NodeId, mask: Option<NodeId>) -> LumaResult<()> {
        self.assert_confined();
        self.require(operation)?;
        if let Some(m) = mask {
            self.require(m)?;
        }

        let previous = self
            .entry_mut(operation)
            .and_then(|e| e.sources.set_mask(None));
        if let Some(prev) = previous {
            if let Some(e) = self.entry_mut(prev) {
                e.targets.remove(Target {
                    node: operation,
                    port: Port::Mask,
                });
            }
            if mask.is_none() {
                self.with_dyn_node(operation, |node, ctx| node.mask_attached(false, ctx))
                    .transpose()?;
            }
        }

        if let Some(m) = mask {
            self.with_dyn_node(operation, |node, ctx| node.mask_attached(true, ctx))
                .transpose()?;
            if let Some(e) = self.entry_mut(m) {
                e.targets.append(Target {
                    node: operation,
                    port: Port::Mask,
                });
            }
            if let Some(e) = self.entry_mut(operation) {
                e.sources.set_mask(Some(m));
            }
        }
        self.release_retired_textures();
        Ok(())
    }

    /// Remove a node from the graph, disconnecting every edge and releasing every
    /// framebuffer it holds.
    pub fn remove_node(&mut self, id: NodeId) -> LumaResult<()> {
        self.assert_confined();
        self.require(id)?;

        self.remove_all_targets(id);
        let (inputs, mask) = match self.entry(id) {
            Some(e) => (e.sources.iter().collect::<Vec<_>>(), e.sources.mask()),
            None => (Vec::new(), None),
        };
        for (index, source) in inputs {
            if let Some(e) = self.entry_mut(source) {
                e.targets.remove(Target {
                    node: id,
                    port: Port::Input(index),
                });
            }
        }
        if let Some(m) = mask
            && let Some(e) = self.entry_mut(m)
        {
            e.targets.remove(Target {
                node: id,
                port: Port::Mask,
            });
        }

        self.with_dyn_node(id, |node, ctx| node.release_resources(ctx));
        if let Some(slot) = self.nodes.get_mut(id.0 as usize) {
            *slot = None;
        }
        self.release_retired_textures();
        tracing::debug!(?id, "node removed");
        Ok(())
    }

    // ---- propagation -------------------------------------------------------

    /// Hand `framebuffer` to every target of `source`, then keep delivering whatever the
    /// targets emit until the graph settles.
    ///
    /// `framebuffer` must carry one lock owned by the caller; that lock is consumed.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn update_targets(&mut self, source: NodeId, framebuffer: FramebufferId) -> LumaResult<()> {
        self.assert_confined();
        let mut pending = VecDeque::new();
        self.fan_out(source, framebuffer, &mut pending);

        while let Some(delivery) = pending.pop_front() {
            let node = delivery.target.node;
            match self.deliver(delivery) {
                Ok(Some(output)) => {
                    self.stats.outputs = self.stats.outputs.saturating_add(1);
                    self.fan_out(node, output, &mut pending);
                }
                Ok(None) => {}
                Err(err) => {
                    for d in pending.drain(..) {
                        self.cache.unlock(d.framebuffer);
                    }
                    self.release_retired_textures();
                    tracing::warn!(?node, error = %err, "propagation aborted");
                    return Err(err);
                }
            }
        }
        self.release_retired_textures();
        Ok(())
    }

    fn fan_out(
        &mut self,
        source: NodeId,
        framebuffer: FramebufferId,
        pending: &mut VecDeque<Delivery>,
    ) {
        let targets = self.targets(source);
        for target in targets {
            self.cache.lock(framebuffer);
            pending.push_back(Delivery {
                target,
                framebuffer,
            });
        }
        self.cache.unlock(framebuffer);
    }

    fn deliver(&mut self, delivery: Delivery) -> LumaResult<Option<FramebufferId>> {
        let Delivery {
            target,
            framebuffer,
        } = delivery;
        let outcome = self.with_dyn_node(target.node, |node, ctx| match target.port {
            Port::Input(index) => node.new_framebuffer_available(framebuffer, index, ctx),
            Port::Mask => node
                .mask_framebuffer_available(framebuffer, ctx)
                .map(|()| None),
        });
        match outcome {
            Some(result) => {
                self.stats.deliveries = self.stats.deliveries.saturating_add(1);
                result
            }
            None => {
                self.stats.undeliverable = self.stats.undeliverable.saturating_add(1);
                self.cache.unlock(framebuffer);
                Ok(None)
            }
        }
    }

    // ---- framebuffers ------------------------------------------------------

    pub fn framebuffer(&self, id: FramebufferId) -> LumaResult<&Framebuffer> {
        self.cache.framebuffer(id)
    }

    pub fn lock(&mut self, id: FramebufferId) {
        self.assert_confined();
        self.cache.lock(id);
    }

    pub fn unlock(&mut self, id: FramebufferId) {
        self.assert_confined();
        self.cache.unlock(id);
        self.release_retired_textures();
    }

    pub fn read_framebuffer(&mut self, id: FramebufferId) -> LumaResult<FrameRGBA> {
        self.assert_confined();
        let texture = self.cache.framebuffer(id)?.texture();
        self.backend.read_rgba8(texture)
    }

    /// Upload RGBA8 pixels into a pooled framebuffer, locked once for the caller.
    pub fn upload_rgba8(
        &mut self,
        size: GlSize,
        data: &[u8],
        orientation: ImageOrientation,
        timing: FramebufferTiming,
    ) -> LumaResult<FramebufferId> {
        self.assert_confined();
        let id = self
            .cache
            .request(self.backend.as_mut(), size, orientation, false)?;
        let texture = self.cache.framebuffer(id)?.texture();
        if let Err(err) = self.backend.upload_rgba8(texture, data) {
            self.cache.unlock(id);
            return Err(err);
        }
        if let Some(fb) = self.cache.get_mut(id) {
            fb.set_timing(timing);
        }
        Ok(id)
    }

    /// Upload RGBA8 pixels into a dedicated texture that is destroyed, not pooled, after
    /// its last unlock.
    pub fn import_rgba8(
        &mut self,
        size: GlSize,
        data: &[u8],
        orientation: ImageOrientation,
        timing: FramebufferTiming,
    ) -> LumaResult<FramebufferId> {
        self.assert_confined();
        let texture = self.backend.create_texture(size, false)?;
        if let Err(err) = self.backend.upload_rgba8(texture, data) {
            self.backend.release_texture(texture);
            return Err(err);
        }
        Ok(self.cache.import(texture, size, orientation, timing))
    }

    /// Free the storage of every pooled framebuffer.
    pub fn purge_all_unassigned_framebuffers(&mut self) {
        self.assert_confined();
        self.cache
            .purge_all_unassigned_framebuffers(self.backend.as_mut());
        self.release_retired_textures();
    }

    fn release_retired_textures(&mut self) {
        for texture in self.cache.take_retired_textures() {
            self.backend.release_texture(texture);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/pipeline.rs"]
mod tests;
