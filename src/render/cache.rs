use std::collections::HashMap;

use crate::foundation::core::GlSize;
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::ImageOrientation;
use crate::render::backend::{RenderBackend, TextureHandle};
use crate::render::framebuffer::{
    Framebuffer, FramebufferId, FramebufferOrigin, FramebufferTiming,
};

/// Exact shape a pooled framebuffer is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub size: GlSize,
    pub orientation: ImageOrientation,
    pub stencil: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FramebufferCacheStats {
    /// Framebuffers that needed fresh texture storage.
    pub allocated: u64,
    /// Requests satisfied from the free pool.
    pub reused: u64,
    /// Unlock-to-zero transitions that put a framebuffer back in the pool.
    pub returned: u64,
    /// Pooled framebuffers whose storage was released by a purge.
    pub purged: u64,
    /// Externally created textures registered with [`FramebufferCache::import`].
    pub imported: u64,
    /// Imported framebuffers destroyed after their last unlock.
    pub destroyed: u64,
}

struct Slot {
    generation: u32,
    framebuffer: Option<Framebuffer>,
}

/// Pooling allocator and registry for every framebuffer of one rendering context.
///
/// Framebuffers are addressed by [`FramebufferId`]; the cache is the only owner of
/// their state. Pooled buffers are keyed by exact `(size, orientation, stencil)`,
/// there is no best-fit reuse.
pub struct FramebufferCache {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    pool: HashMap<FramebufferKey, Vec<FramebufferId>>,
    retired: Vec<TextureHandle>,
    stats: FramebufferCacheStats,
}

impl Default for FramebufferCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FramebufferCache {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            pool: HashMap::new(),
            retired: Vec::new(),
            stats: FramebufferCacheStats::default(),
        }
    }

    pub fn stats(&self) -> FramebufferCacheStats {
        self.stats.clone()
    }

    /// Hand out a framebuffer of exactly this shape, locked once for the caller.
    #[tracing::instrument(level = "trace", skip(self, backend))]
    pub fn request(
        &mut self,
        backend: &mut dyn RenderBackend,
        size: GlSize,
        orientation: ImageOrientation,
        stencil: bool,
    ) -> LumaResult<FramebufferId> {
        let key = FramebufferKey {
            size,
            orientation,
            stencil,
        };
        if let Some(id) = self.pool.get_mut(&key).and_then(Vec::pop) {
            let fb = self.slot_mut(id)?;
            debug_assert_eq!(fb.ref_count, 0, "pooled framebuffer was still locked");
            fb.ref_count = 1;
            fb.timing = FramebufferTiming::Transient;
            self.stats.reused = self.stats.reused.saturating_add(1);
            return Ok(id);
        }

        let texture = backend.create_texture(size, stencil)?;
        self.stats.allocated = self.stats.allocated.saturating_add(1);
        tracing::debug!(
            width = size.width,
            height = size.height,
            ?orientation,
            stencil,
            "allocated framebuffer"
        );
        Ok(self.insert(|id| Framebuffer {
            id,
            size,
            orientation,
            timing: FramebufferTiming::Transient,
            texture,
            has_stencil: stencil,
            ref_count: 1,
            origin: FramebufferOrigin::Cache,
            user_info: None,
        }))
    }

    /// Register an externally created texture. The returned framebuffer is locked once
    /// and is destroyed, rather than pooled, when its count reaches zero.
    pub fn import(
        &mut self,
        texture: TextureHandle,
        size: GlSize,
        orientation: ImageOrientation,
        timing: FramebufferTiming,
    ) -> FramebufferId {
        self.stats.imported = self.stats.imported.saturating_add(1);
        self.insert(|id| Framebuffer {
            id,
            size,
            orientation,
            timing,
            texture,
            has_stencil: false,
            ref_count: 1,
            origin: FramebufferOrigin::Imported,
            user_info: None,
        })
    }

    fn insert(&mut self, build: impl FnOnce(FramebufferId) -> Framebuffer) -> FramebufferId {
        let index = match self.vacant.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    framebuffer: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = FramebufferId {
            index,
            generation: slot.generation,
        };
        slot.framebuffer = Some(build(id));
        id
    }

    fn remove(&mut self, id: FramebufferId) -> Option<Framebuffer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let fb = slot.framebuffer.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);
        Some(fb)
    }

    pub fn get(&self, id: FramebufferId) -> Option<&Framebuffer> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.framebuffer.as_ref()
    }

    pub fn get_mut(&mut self, id: FramebufferId) -> Option<&mut Framebuffer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.framebuffer.as_mut()
    }

    /// Like [`FramebufferCache::get`] but stale handles are an error.
    pub fn framebuffer(&self, id: FramebufferId) -> LumaResult<&Framebuffer> {
        self.get(id)
            .ok_or_else(|| LumaError::validation(format!("stale framebuffer handle {id:?}")))
    }

    fn slot_mut(&mut self, id: FramebufferId) -> LumaResult<&mut Framebuffer> {
        self.get_mut(id)
            .ok_or_else(|| LumaError::validation(format!("stale framebuffer handle {id:?}")))
    }

    pub fn ref_count(&self, id: FramebufferId) -> Option<u32> {
        self.get(id).map(|fb| fb.ref_count)
    }

    pub fn lock(&mut self, id: FramebufferId) {
        match self.get_mut(id) {
            Some(fb) => fb.ref_count = fb.ref_count.saturating_add(1),
            None => tracing::warn!(?id, "lock on stale framebuffer ignored"),
        }
    }

    /// Drop one hold. At zero a pooled framebuffer goes back to the free pool and an
    /// imported one is destroyed, its texture queued for release.
    pub fn unlock(&mut self, id: FramebufferId) {
        let Some(fb) = self.get_mut(id) else {
            tracing::warn!(?id, "unlock on stale framebuffer ignored");
            return;
        };
        if fb.ref_count == 0 {
            tracing::warn!(?id, "unlock below zero ignored");
            return;
        }
        fb.ref_count -= 1;
        if fb.ref_count > 0 {
            return;
        }
        fb.user_info = None;
        let origin = fb.origin;
        let key = FramebufferKey {
            size: fb.size,
            orientation: fb.orientation,
            stencil: fb.has_stencil,
        };

        match origin {
            FramebufferOrigin::Cache => {
                self.pool.entry(key).or_default().push(id);
                self.stats.returned = self.stats.returned.saturating_add(1);
            }
            FramebufferOrigin::Imported => {
                if let Some(fb) = self.remove(id) {
                    self.retired.push(fb.texture);
                    self.stats.destroyed = self.stats.destroyed.saturating_add(1);
                }
            }
        }
    }

    /// Release the storage of every pooled framebuffer. Locked framebuffers are untouched.
    pub fn purge_all_unassigned_framebuffers(&mut self, backend: &mut dyn RenderBackend) {
        let pooled: Vec<FramebufferId> = self.pool.drain().flat_map(|(_, ids)| ids).collect();
        let count = pooled.len();
        for id in pooled {
            if let Some(fb) = self.remove(id) {
                backend.release_texture(fb.texture);
            }
        }
        self.stats.purged = self.stats.purged.saturating_add(count as u64);
        tracing::debug!(count, "purged unassigned framebuffers");
    }

    /// Textures of destroyed imported framebuffers awaiting release by the backend owner.
    pub fn take_retired_textures(&mut self) -> Vec<TextureHandle> {
        std::mem::take(&mut self.retired)
    }

    /// Framebuffers currently sitting in the free pool.
    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    /// Framebuffers registered with the cache, pooled or in use.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.framebuffer.is_some()).count()
    }

    /// Framebuffers holding at least one lock.
    pub fn locked_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|s| s.framebuffer.as_ref())
            .filter(|fb| fb.ref_count > 0)
            .count()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/cache.rs"]
mod tests;
