use super::*;
use crate::foundation::orientation::{Rotation, STANDARD_IMAGE_VERTICES};
use crate::render::backend::InputTexture;
use crate::render::programs::{passthrough_source, stencil_mask_source};

fn size(w: u32, h: u32) -> GlSize {
    GlSize::new(w, h).unwrap()
}

fn gradient(w: u32, h: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            out.extend_from_slice(&[(x * 40) as u8, (y * 40) as u8, 7, 255]);
        }
    }
    out
}

fn draw<'a>(
    target: TextureHandle,
    program: ProgramHandle,
    inputs: &'a [InputTexture],
    stencil: StencilMode,
) -> QuadDraw<'a> {
    QuadDraw {
        target,
        program,
        vertices: STANDARD_IMAGE_VERTICES,
        inputs,
        uniforms: &[],
        stencil,
    }
}

#[test]
fn passthrough_copies_rows_in_memory_order() {
    for parallel in [true, false] {
        let mut be = CpuBackend::new(CpuBackendOpts { parallel });
        let src = be.create_texture(size(5, 3), false).unwrap();
        let dst = be.create_texture(size(5, 3), false).unwrap();
        let pixels = gradient(5, 3);
        be.upload_rgba8(src, &pixels).unwrap();
        let program = be.compile_program(&passthrough_source()).unwrap();

        let inputs = [InputTexture {
            texture: src,
            coordinates: Rotation::NoRotation.texture_coordinates(),
        }];
        be.draw_quad(&draw(dst, program, &inputs, StencilMode::Disabled))
            .unwrap();
        assert_eq!(be.read_rgba8(dst).unwrap().data, pixels);
    }
}

#[test]
fn rotate_180_reverses_pixel_order() {
    let mut be = CpuBackend::new(CpuBackendOpts::default());
    let src = be.create_texture(size(4, 2), false).unwrap();
    let dst = be.create_texture(size(4, 2), false).unwrap();
    let pixels = gradient(4, 2);
    be.upload_rgba8(src, &pixels).unwrap();
    let program = be.compile_program(&passthrough_source()).unwrap();
    let inputs = [InputTexture {
        texture: src,
        coordinates: Rotation::Rotate180.texture_coordinates(),
    }];
    be.draw_quad(&draw(dst, program, &inputs, StencilMode::Disabled))
        .unwrap();

    let out = be.read_rgba8(dst).unwrap();
    let expected: Vec<u8> = pixels
        .chunks_exact(4)
        .rev()
        .flat_map(|p| p.to_vec())
        .collect();
    assert_eq!(out.data, expected);
}

#[test]
fn stencil_restricts_color_writes_to_mask() {
    let mut be = CpuBackend::new(CpuBackendOpts::default());
    let mask = be.create_texture(size(2, 1), false).unwrap();
    be.upload_rgba8(mask, &[0, 0, 0, 255, 0, 0, 0, 0]).unwrap();
    let paint = be.create_texture(size(2, 1), false).unwrap();
    be.upload_rgba8(paint, &[200, 10, 10, 255, 200, 10, 10, 255])
        .unwrap();
    let target = be.create_texture(size(2, 1), true).unwrap();
    be.clear(target, Color::BLACK).unwrap();

    let mask_program = be.compile_program(&stencil_mask_source()).unwrap();
    let pass = be.compile_program(&passthrough_source()).unwrap();
    let coords = Rotation::NoRotation.texture_coordinates();

    let mask_in = [InputTexture {
        texture: mask,
        coordinates: coords,
    }];
    be.draw_quad(&draw(target, mask_program, &mask_in, StencilMode::WriteMask))
        .unwrap();
    // writing the stencil leaves color untouched
    assert_eq!(
        be.read_rgba8(target).unwrap().data,
        vec![0, 0, 0, 255, 0, 0, 0, 255]
    );

    let paint_in = [InputTexture {
        texture: paint,
        coordinates: coords,
    }];
    be.draw_quad(&draw(target, pass, &paint_in, StencilMode::TestMask))
        .unwrap();
    let out = be.read_rgba8(target).unwrap();
    assert_eq!(out.pixel(0, 0), Some([200, 10, 10, 255]));
    assert_eq!(out.pixel(1, 0), Some([0, 0, 0, 255]));

    // clearing resets the stencil
    be.clear(target, Color::BLACK).unwrap();
    be.draw_quad(&draw(target, pass, &paint_in, StencilMode::TestMask))
        .unwrap();
    assert_eq!(be.read_rgba8(target).unwrap().pixel(0, 0), Some([0, 0, 0, 255]));
}

#[test]
fn stencil_draw_without_attachment_is_rejected() {
    let mut be = CpuBackend::new(CpuBackendOpts::default());
    let src = be.create_texture(size(2, 2), false).unwrap();
    let dst = be.create_texture(size(2, 2), false).unwrap();
    let program = be.compile_program(&stencil_mask_source()).unwrap();
    let inputs = [InputTexture {
        texture: src,
        coordinates: Rotation::NoRotation.texture_coordinates(),
    }];
    let err = be
        .draw_quad(&draw(dst, program, &inputs, StencilMode::WriteMask))
        .unwrap_err();
    assert!(err.to_string().contains("stencil"));
}

#[test]
fn sampling_the_target_is_rejected_and_target_survives() {
    let mut be = CpuBackend::new(CpuBackendOpts::default());
    let t = be.create_texture(size(2, 2), false).unwrap();
    let program = be.compile_program(&passthrough_source()).unwrap();
    let inputs = [InputTexture {
        texture: t,
        coordinates: Rotation::NoRotation.texture_coordinates(),
    }];
    assert!(
        be.draw_quad(&draw(t, program, &inputs, StencilMode::Disabled))
            .is_err()
    );
    assert_eq!(be.live_textures(), 1);
}

#[test]
fn compile_failure_carries_diagnostic() {
    let mut be = CpuBackend::new(CpuBackendOpts::default());
    let mut src = passthrough_source();
    src.fragment_wgsl = "@fragment fn fs_main( {".to_string();
    let err = be.compile_program(&src).unwrap_err();
    assert_eq!(err.label, "passthrough");
    assert!(!err.diagnostic.is_empty());
}

#[test]
fn upload_size_mismatch_is_an_error() {
    let mut be = CpuBackend::new(CpuBackendOpts::default());
    let t = be.create_texture(size(2, 2), false).unwrap();
    assert!(be.upload_rgba8(t, &[0; 15]).is_err());
    be.release_texture(t);
    assert_eq!(be.live_textures(), 0);
}
