use std::sync::Arc;

use super::*;
use crate::graph::container::NodeId;
use crate::outputs::InMemoryOutput;
use crate::render::programs::passthrough_source;
use crate::render::shader::Fragment;
use crate::sources::RawDataInput;

const INVERT_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(input_texture, input_sampler, in.texture_coordinate);
    return vec4<f32>(1.0 - c.rgb, c.a);
}
"#;

fn invert(f: &Fragment<'_>) -> Option<[f32; 4]> {
    let c = f.sample(0);
    Some([1.0 - c[0], 1.0 - c[1], 1.0 - c[2], c[3]])
}

fn invert_source() -> ShaderSource {
    ShaderSource::new("invert", 1, INVERT_FRAGMENT, invert)
}

const ADD_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let a = textureSample(input_texture, input_sampler, in.texture_coordinate);
    let b = textureSample(input_texture2, input_sampler, in.texture_coordinate2);
    return vec4<f32>(min(a.rgb + b.rgb, vec3<f32>(1.0)), 1.0);
}
"#;

fn add(f: &Fragment<'_>) -> Option<[f32; 4]> {
    let (a, b) = (f.sample(0), f.sample(1));
    Some([
        (a[0] + b[0]).min(1.0),
        (a[1] + b[1]).min(1.0),
        (a[2] + b[2]).min(1.0),
        1.0,
    ])
}

fn add_source() -> ShaderSource {
    ShaderSource::new("add", 2, ADD_FRAGMENT, add)
}

struct Rig {
    p: Pipeline,
    a: NodeId,
    b: NodeId,
    op: NodeId,
    out: NodeId,
}

fn two_input_rig() -> Rig {
    let mut p = Pipeline::cpu();
    let a = p.add_node(RawDataInput::new());
    let b = p.add_node(RawDataInput::new());
    let op = BasicOperation::new(&mut p, &add_source()).unwrap();
    let op = p.add_node(op);
    let out = p.add_node(InMemoryOutput::new());
    p.add_target(a, op, 0).unwrap();
    p.add_target(b, op, 1).unwrap();
    p.add_target(op, out, 0).unwrap();
    Rig { p, a, b, op, out }
}

fn push(p: &mut Pipeline, source: NodeId, rgba: [u8; 4], timing: FramebufferTiming) -> FramebufferId {
    let fb = p
        .upload_rgba8(
            GlSize::new(2, 1).unwrap(),
            &rgba.repeat(2),
            ImageOrientation::Portrait,
            timing,
        )
        .unwrap();
    p.update_targets(source, fb).unwrap();
    fb
}

fn frames(p: &Pipeline, out: NodeId) -> usize {
    p.node::<InMemoryOutput>(out).unwrap().len()
}

#[test]
fn rejects_program_arity_mismatch() {
    let mut p = Pipeline::cpu();
    let program = p.program(&passthrough_source()).unwrap();
    assert!(BasicOperation::with_program(program.clone(), 2).is_err());
    assert!(BasicOperation::with_program(program.clone(), 0).is_err());
    let op = BasicOperation::with_program(program, 1).unwrap();
    assert_eq!(op.maximum_inputs(), 1);
    assert_eq!(op.background_color(), Color::BLACK);
    assert!(op.draw_unmodified_image_outside_of_mask());
}

#[test]
fn renders_only_once_every_input_is_filled() {
    let mut r = two_input_rig();
    push(&mut r.p, r.a, [100, 0, 0, 255], FramebufferTiming::Transient);
    assert_eq!(frames(&r.p, r.out), 0);
    assert_eq!(r.p.node::<BasicOperation>(r.op).unwrap().occupied_inputs(), 1);

    push(&mut r.p, r.b, [0, 50, 0, 255], FramebufferTiming::Transient);
    assert_eq!(frames(&r.p, r.out), 1);
    let px = r.p.node::<InMemoryOutput>(r.out).unwrap().last().unwrap();
    assert_eq!(px.pixels.as_ref().unwrap().pixel(0, 0), Some([100, 50, 0, 255]));
    assert_eq!(r.p.node::<BasicOperation>(r.op).unwrap().render_count(), 1);
}

#[test]
fn last_write_wins_within_a_slot() {
    let mut r = two_input_rig();
    let first = push(&mut r.p, r.a, [10, 0, 0, 255], FramebufferTiming::Transient);
    push(&mut r.p, r.a, [20, 0, 0, 255], FramebufferTiming::Transient);
    assert_eq!(r.p.cache().ref_count(first), Some(0));

    push(&mut r.p, r.b, [0, 0, 0, 255], FramebufferTiming::Transient);
    let out = r.p.node::<InMemoryOutput>(r.out).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out.last().unwrap().pixels.as_ref().unwrap().pixel(1, 0), Some([20, 0, 0, 255]));
}

#[test]
fn still_inputs_persist_across_renders() {
    let mut r = two_input_rig();
    let still = push(&mut r.p, r.b, [0, 0, 40, 255], FramebufferTiming::StillImage);
    for i in 1..=3u8 {
        push(
            &mut r.p,
            r.a,
            [i * 10, 0, 0, 255],
            FramebufferTiming::VideoFrame(MediaTime::from_millis(i64::from(i) * 33)),
        );
    }
    assert_eq!(frames(&r.p, r.out), 3);
    let op = r.p.node::<BasicOperation>(r.op).unwrap();
    assert_eq!(op.input_framebuffer(1), Some(still));
    assert_eq!(op.input_framebuffer(0), None);

    let last = r.p.node::<InMemoryOutput>(r.out).unwrap().last().unwrap();
    assert_eq!(last.pixels.as_ref().unwrap().pixel(0, 0), Some([30, 0, 40, 255]));
    assert_eq!(last.timing, FramebufferTiming::VideoFrame(MediaTime::from_millis(99)));
}

#[test]
fn release_retention_forces_a_fresh_frame() {
    let mut r = two_input_rig();
    r.p.node_mut::<BasicOperation>(r.op)
        .unwrap()
        .set_input_retention(1, InputRetention::Release);

    push(&mut r.p, r.b, [0, 0, 40, 255], FramebufferTiming::StillImage);
    push(&mut r.p, r.a, [10, 0, 0, 255], FramebufferTiming::Transient);
    push(&mut r.p, r.a, [20, 0, 0, 255], FramebufferTiming::Transient);
    assert_eq!(frames(&r.p, r.out), 1);
}

#[test]
fn retain_keeps_transient_inputs() {
    let mut r = two_input_rig();
    r.p.node_mut::<BasicOperation>(r.op)
        .unwrap()
        .set_input_retention(0, InputRetention::Retain);

    push(&mut r.p, r.a, [10, 0, 0, 255], FramebufferTiming::Transient);
    push(&mut r.p, r.b, [0, 5, 0, 255], FramebufferTiming::Transient);
    push(&mut r.p, r.b, [0, 6, 0, 255], FramebufferTiming::Transient);
    assert_eq!(frames(&r.p, r.out), 2);
}

#[test]
fn release_all_after_rendering_overrides_retention() {
    let mut r = two_input_rig();
    r.p.node_mut::<BasicOperation>(r.op)
        .unwrap()
        .set_release_all_inputs_after_rendering(true);

    push(&mut r.p, r.b, [0, 0, 40, 255], FramebufferTiming::StillImage);
    push(&mut r.p, r.a, [10, 0, 0, 255], FramebufferTiming::Transient);
    assert_eq!(frames(&r.p, r.out), 1);
    assert_eq!(r.p.node::<BasicOperation>(r.op).unwrap().occupied_inputs(), 0);
    push(&mut r.p, r.a, [20, 0, 0, 255], FramebufferTiming::Transient);
    assert_eq!(frames(&r.p, r.out), 1);
}

#[test]
fn output_timing_follows_inputs() {
    let mut r = two_input_rig();
    push(&mut r.p, r.a, [0, 0, 0, 255], FramebufferTiming::StillImage);
    push(&mut r.p, r.b, [0, 0, 0, 255], FramebufferTiming::StillImage);
    push(&mut r.p, r.b, [0, 0, 0, 255], FramebufferTiming::Transient);
    push(
        &mut r.p,
        r.a,
        [0, 0, 0, 255],
        FramebufferTiming::VideoFrame(MediaTime::from_millis(5)),
    );
    push(&mut r.p, r.b, [0, 0, 0, 255], FramebufferTiming::StillImage);

    let timings: Vec<_> = r
        .p
        .node::<InMemoryOutput>(r.out)
        .unwrap()
        .frames()
        .iter()
        .map(|f| f.timing)
        .collect();
    assert_eq!(
        timings,
        vec![
            FramebufferTiming::StillImage,
            FramebufferTiming::Transient,
            FramebufferTiming::VideoFrame(MediaTime::from_millis(5)),
        ]
    );
}

#[test]
fn user_info_is_carried_from_the_first_input() {
    let mut r = two_input_rig();
    push(&mut r.p, r.b, [0, 0, 0, 255], FramebufferTiming::StillImage);

    let fb = r
        .p
        .upload_rgba8(
            GlSize::new(2, 1).unwrap(),
            &[0; 8],
            ImageOrientation::Portrait,
            FramebufferTiming::Transient,
        )
        .unwrap();
    r.p.cache_mut()
        .get_mut(fb)
        .unwrap()
        .set_user_info(Some(Arc::new(7u32)));
    r.p.update_targets(r.a, fb).unwrap();

    let last = r.p.node::<InMemoryOutput>(r.out).unwrap().last().unwrap();
    let info = last.user_info.as_ref().unwrap();
    assert_eq!(info.downcast_ref::<u32>(), Some(&7));
}

#[test]
fn passthrough_forwards_the_incoming_framebuffer() {
    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());
    let mut op = BasicOperation::new(&mut p, &invert_source()).unwrap();
    op.activate_passthrough_on_next_frame();
    let op = p.add_node(op);
    let out = p.add_node(InMemoryOutput::new());
    p.chain(&[src, op, out]).unwrap();

    push(&mut p, src, [200, 100, 0, 255], FramebufferTiming::Transient);
    push(&mut p, src, [200, 100, 0, 255], FramebufferTiming::Transient);

    let frames = p.node::<InMemoryOutput>(out).unwrap().frames();
    assert_eq!(frames[0].pixels.as_ref().unwrap().pixel(0, 0), Some([200, 100, 0, 255]));
    assert_eq!(frames[1].pixels.as_ref().unwrap().pixel(0, 0), Some([55, 155, 255, 255]));
    let op = p.node::<BasicOperation>(op).unwrap();
    assert_eq!(op.render_count(), 1);
}

#[test]
fn delivery_past_last_input_is_dropped() {
    let mut p = Pipeline::cpu();
    let op = BasicOperation::new(&mut p, &invert_source()).unwrap();
    let op = p.add_node(op);
    let fb = p
        .upload_rgba8(
            GlSize::new(1, 1).unwrap(),
            &[0, 0, 0, 255],
            ImageOrientation::Portrait,
            FramebufferTiming::Transient,
        )
        .unwrap();
    let out = p
        .with_node::<BasicOperation, _>(op, |o, ctx| o.receive(fb, 3, ctx, &mut DefaultHooks))
        .unwrap()
        .unwrap();
    assert!(out.is_none());
    assert_eq!(p.cache().ref_count(fb), Some(0));
}

#[test]
fn mask_limits_the_effect() {
    for draw_unmodified in [true, false] {
        let mut p = Pipeline::cpu();
        let src = p.add_node(RawDataInput::new());
        let mask_src = p.add_node(RawDataInput::new());
        let mut op = BasicOperation::new(&mut p, &invert_source()).unwrap();
        op.set_draw_unmodified_image_outside_of_mask(draw_unmodified);
        let op = p.add_node(op);
        let out = p.add_node(InMemoryOutput::new());
        p.chain(&[src, op, out]).unwrap();
        p.set_mask(op, Some(mask_src)).unwrap();
        assert!(p.node::<BasicOperation>(op).unwrap().has_mask());

        let mask = p
            .upload_rgba8(
                GlSize::new(2, 1).unwrap(),
                &[255, 255, 255, 255, 0, 0, 0, 0],
                ImageOrientation::Portrait,
                FramebufferTiming::StillImage,
            )
            .unwrap();
        p.update_targets(mask_src, mask).unwrap();
        assert_eq!(p.node::<BasicOperation>(op).unwrap().mask_framebuffer(), Some(mask));

        push(&mut p, src, [200, 100, 0, 255], FramebufferTiming::Transient);
        let frame = p.node::<InMemoryOutput>(out).unwrap().last().unwrap().clone();
        let pixels = frame.pixels.unwrap();
        assert_eq!(pixels.pixel(0, 0), Some([55, 155, 255, 255]));
        let outside = if draw_unmodified {
            [200, 100, 0, 255]
        } else {
            [0, 0, 0, 255]
        };
        assert_eq!(pixels.pixel(1, 0), Some(outside));

        p.set_mask(op, None).unwrap();
        assert_eq!(p.cache().ref_count(mask), Some(0));
    }
}

#[test]
fn overridden_output_size_and_rotation() {
    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());
    let mut op = BasicOperation::new(&mut p, &passthrough_source()).unwrap();
    op.set_overridden_output_size(Some(GlSize::new(1, 2).unwrap()));
    op.set_overridden_output_rotation(Some(Rotation::RotateClockwise));
    let op = p.add_node(op);
    let out = p.add_node(InMemoryOutput::metadata_only());
    p.chain(&[src, op, out]).unwrap();

    push(&mut p, src, [1, 2, 3, 255], FramebufferTiming::Transient);
    let frame = p.node::<InMemoryOutput>(out).unwrap().last().unwrap().clone();
    assert_eq!(frame.size, GlSize::new(1, 2).unwrap());
    assert_eq!(frame.orientation, ImageOrientation::Portrait);
}

#[test]
fn retention_policy_table() {
    use FramebufferTiming::*;
    let t = VideoFrame(MediaTime::ZERO);
    assert!(InputRetention::Automatic.retains(StillImage));
    assert!(!InputRetention::Automatic.retains(t));
    assert!(!InputRetention::Automatic.retains(Transient));
    assert!(InputRetention::Retain.retains(Transient));
    assert!(!InputRetention::Release.retains(StillImage));
}
