use super::*;
use crate::render::cpu::{CpuBackend, CpuBackendOpts};

fn size(w: u32, h: u32) -> GlSize {
    GlSize::new(w, h).unwrap()
}

#[test]
fn unlock_to_zero_returns_to_pool_and_is_reused() {
    let mut backend = CpuBackend::new(CpuBackendOpts::default());
    let mut cache = FramebufferCache::new();

    let a = cache
        .request(&mut backend, size(8, 8), ImageOrientation::Portrait, false)
        .unwrap();
    assert_eq!(cache.ref_count(a), Some(1));
    cache.lock(a);
    cache.unlock(a);
    assert_eq!(cache.ref_count(a), Some(1));
    assert_eq!(cache.pooled_count(), 0);

    cache.unlock(a);
    assert_eq!(cache.ref_count(a), Some(0));
    assert_eq!(cache.pooled_count(), 1);

    let b = cache
        .request(&mut backend, size(8, 8), ImageOrientation::Portrait, false)
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(cache.ref_count(b), Some(1));
    let st = cache.stats();
    assert_eq!(st.allocated, 1);
    assert_eq!(st.reused, 1);
    assert_eq!(st.returned, 1);
}

#[test]
fn key_is_exact_on_size_and_stencil() {
    let mut backend = CpuBackend::new(CpuBackendOpts::default());
    let mut cache = FramebufferCache::new();

    let big = cache
        .request(&mut backend, size(16, 16), ImageOrientation::Portrait, false)
        .unwrap();
    cache.unlock(big);

    let small = cache
        .request(&mut backend, size(8, 8), ImageOrientation::Portrait, false)
        .unwrap();
    assert_ne!(small, big);
    assert_eq!(cache.framebuffer(small).unwrap().size(), size(8, 8));

    let stencil = cache
        .request(&mut backend, size(16, 16), ImageOrientation::Portrait, true)
        .unwrap();
    assert_ne!(stencil, big);
    assert!(cache.framebuffer(stencil).unwrap().has_stencil());

    let landscape = cache
        .request(&mut backend, size(16, 16), ImageOrientation::LandscapeLeft, false)
        .unwrap();
    assert_ne!(landscape, big);
    assert_eq!(cache.stats().reused, 0);
}

#[test]
fn purge_releases_only_pooled_storage() {
    let mut backend = CpuBackend::new(CpuBackendOpts::default());
    let mut cache = FramebufferCache::new();

    let held = cache
        .request(&mut backend, size(4, 4), ImageOrientation::Portrait, false)
        .unwrap();
    let pooled = cache
        .request(&mut backend, size(4, 4), ImageOrientation::Portrait, false)
        .unwrap();
    cache.unlock(pooled);
    assert_eq!(backend.live_textures(), 2);

    cache.purge_all_unassigned_framebuffers(&mut backend);
    assert_eq!(backend.live_textures(), 1);
    assert!(cache.get(pooled).is_none());
    assert_eq!(cache.ref_count(held), Some(1));
    assert_eq!(cache.stats().purged, 1);
    assert_eq!(cache.pooled_count(), 0);
}

#[test]
fn imported_framebuffers_are_destroyed_not_pooled() {
    let mut backend = CpuBackend::new(CpuBackendOpts::default());
    let mut cache = FramebufferCache::new();
    let texture = backend.create_texture(size(2, 2), false).unwrap();

    let id = cache.import(
        texture,
        size(2, 2),
        ImageOrientation::Portrait,
        FramebufferTiming::StillImage,
    );
    assert_eq!(cache.framebuffer(id).unwrap().origin(), FramebufferOrigin::Imported);
    cache.unlock(id);

    assert!(cache.get(id).is_none());
    assert_eq!(cache.pooled_count(), 0);
    assert_eq!(cache.take_retired_textures(), vec![texture]);
    assert_eq!(cache.stats().destroyed, 1);
}

#[test]
fn stale_handles_do_not_alias_reused_slots() {
    let mut backend = CpuBackend::new(CpuBackendOpts::default());
    let mut cache = FramebufferCache::new();
    let texture = backend.create_texture(size(2, 2), false).unwrap();
    let old = cache.import(
        texture,
        size(2, 2),
        ImageOrientation::Portrait,
        FramebufferTiming::StillImage,
    );
    cache.unlock(old);

    let fresh = cache
        .request(&mut backend, size(2, 2), ImageOrientation::Portrait, false)
        .unwrap();
    assert_eq!(fresh.index, old.index);
    assert!(cache.get(old).is_none());
    assert!(cache.framebuffer(old).is_err());
    assert_eq!(cache.live_count(), 1);
    assert_eq!(cache.locked_count(), 1);
}
