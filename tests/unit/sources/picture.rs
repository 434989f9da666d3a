use super::*;
use crate::outputs::InMemoryOutput;

fn checker() -> image::RgbaImage {
    image::RgbaImage::from_fn(3, 2, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgba([250, 10, 10, 255])
        } else {
            image::Rgba([10, 10, 250, 255])
        }
    })
}

fn temp_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "luma_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

#[test]
fn picture_keeps_its_still_framebuffer_locked() {
    let mut p = Pipeline::cpu();
    let picture = PictureInput::from_image(&mut p, &checker(), ImageOrientation::Portrait).unwrap();
    let fb = picture.framebuffer().unwrap();
    assert_eq!(picture.size(), GlSize::new(3, 2).unwrap());
    assert_eq!(picture.label(), "picture_input");
    assert!(!picture.has_processed_image());

    let framebuffer = p.framebuffer(fb).unwrap();
    assert_eq!(framebuffer.timing(), FramebufferTiming::StillImage);
    assert_eq!(framebuffer.ref_count(), 1);

    let named = picture.with_image_name("checker.png");
    assert_eq!(named.label(), "checker.png");
}

#[test]
fn process_image_can_be_repeated() {
    let mut p = Pipeline::cpu();
    let picture = PictureInput::add(&mut p, &checker(), ImageOrientation::Portrait).unwrap();
    let out = p.add_node(InMemoryOutput::new());
    p.add_target(picture, out, 0).unwrap();

    PictureInput::process_image(&mut p, picture).unwrap();
    PictureInput::process_image(&mut p, picture).unwrap();

    let node = p.node::<PictureInput>(picture).unwrap();
    assert!(node.has_processed_image());
    let fb = node.framebuffer().unwrap();
    assert_eq!(p.cache().ref_count(fb), Some(1));

    let captured = p.node::<InMemoryOutput>(out).unwrap();
    assert_eq!(captured.len(), 2);
    let pixels = captured.last().unwrap().pixels.clone().unwrap();
    assert_eq!(pixels.data, checker().into_raw());
}

#[test]
fn removing_the_picture_releases_its_texture() {
    let mut p = Pipeline::cpu();
    let picture = PictureInput::add(&mut p, &checker(), ImageOrientation::Portrait).unwrap();
    assert_eq!(p.live_textures(), 1);
    p.remove_node(picture).unwrap();
    assert_eq!(p.live_textures(), 0);
    assert_eq!(p.cache().stats().destroyed, 1);
}

#[test]
fn process_image_needs_a_picture_node() {
    let mut p = Pipeline::cpu();
    let out = p.add_node(InMemoryOutput::new());
    let err = PictureInput::process_image(&mut p, out).unwrap_err();
    assert!(matches!(err, LumaError::Validation(_)));
}

#[test]
fn from_path_decodes_and_names_the_picture() {
    let dir = temp_dir("picture_from_path");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("checker.png");
    checker().save(&path).unwrap();

    let mut p = Pipeline::cpu();
    let picture = PictureInput::from_path(&mut p, &path, ImageOrientation::Portrait).unwrap();
    assert_eq!(picture.image_name(), Some("checker.png"));
    assert_eq!(picture.size(), GlSize::new(3, 2).unwrap());

    let missing = PictureInput::from_path(&mut p, &dir.join("nope.png"), ImageOrientation::Portrait);
    assert!(missing.is_err());
    let _ = std::fs::remove_dir_all(&dir);
}
