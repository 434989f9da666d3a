use super::*;
use crate::foundation::core::GlSize;
use crate::graph::queue::ProcessingQueue;
use crate::operations::TransformOperation;
use crate::render::framebuffer::FramebufferTiming;
use crate::sources::RawDataInput;

fn translucent() -> image::RgbaImage {
    image::RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8 * 80, y as u8 * 200, 30, 100]))
}

fn push(p: &mut Pipeline, src: NodeId, img: &image::RgbaImage) {
    let fb = p
        .upload_rgba8(
            GlSize::new(img.width(), img.height()).unwrap(),
            img.as_raw(),
            ImageOrientation::Portrait,
            FramebufferTiming::Transient,
        )
        .unwrap();
    p.update_targets(src, fb).unwrap();
}

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "luma_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

type Seen = Arc<Mutex<Vec<image::RgbaImage>>>;

fn collect_into(output: &mut PictureOutput) -> Seen {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    output.on_image_available(move |img| sink.lock().unwrap().push(img.clone()));
    seen
}

#[test]
fn formats_follow_the_extension() {
    assert_eq!(PictureFileFormat::from_path(Path::new("a.PNG")), Some(PictureFileFormat::Png));
    assert_eq!(PictureFileFormat::from_path(Path::new("a.jpeg")), Some(PictureFileFormat::Jpeg));
    assert_eq!(PictureFileFormat::from_path(Path::new("a.jpg")), Some(PictureFileFormat::Jpeg));
    assert_eq!(PictureFileFormat::from_path(Path::new("a.tiff")), None);
    assert_eq!(PictureFileFormat::from_path(Path::new("noext")), None);
}

#[test]
fn encoded_images_decode_back() {
    let img = translucent();
    let png = encode_image(&img, PictureFileFormat::Png, 80).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded, img);

    let jpeg = encode_image(&img, PictureFileFormat::Jpeg, 90).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (3, 2));
}

#[test]
fn callback_fires_once_unless_told_otherwise() {
    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());

    let mut once = PictureOutput::new();
    let seen_once = collect_into(&mut once);
    let once = p.add_node(once);

    let mut every = PictureOutput::new();
    every.only_capture_next_frame = false;
    let seen_every = collect_into(&mut every);
    let every = p.add_node(every);

    p.add_target(src, once, 0).unwrap();
    p.add_target(src, every, 0).unwrap();
    push(&mut p, src, &translucent());
    push(&mut p, src, &translucent());

    assert_eq!(seen_once.lock().unwrap().len(), 1);
    assert_eq!(seen_every.lock().unwrap().len(), 2);
    assert_eq!(p.node::<PictureOutput>(once).unwrap().frames_received(), 2);
    assert_eq!(p.cache().locked_count(), 0);
}

#[test]
fn alpha_is_dropped_unless_requested() {
    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());
    let mut opaque = PictureOutput::new();
    let seen_opaque = collect_into(&mut opaque);
    let mut alpha = PictureOutput::new();
    alpha.export_with_alpha = true;
    let seen_alpha = collect_into(&mut alpha);
    let opaque = p.add_node(opaque);
    let alpha = p.add_node(alpha);
    p.add_target(src, opaque, 0).unwrap();
    p.add_target(src, alpha, 0).unwrap();

    let img = translucent();
    push(&mut p, src, &img);

    let with_alpha = seen_alpha.lock().unwrap()[0].clone();
    assert_eq!(with_alpha, img);
    let without = seen_opaque.lock().unwrap()[0].clone();
    assert_eq!(without.get_pixel(2, 1).0, [160, 200, 30, 255]);
}

#[test]
fn save_next_frame_writes_the_file() {
    let dir = temp_dir("picture_output_save");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("frame.png");

    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());
    let out = PictureOutput::save_next_frame(&mut p, src, &path, PictureFileFormat::Png).unwrap();
    push(&mut p, src, &translucent());

    let written = image::open(&path).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (3, 2));
    assert_eq!(written.get_pixel(0, 0).0[3], 255);

    // the request is consumed by the first frame
    std::fs::remove_file(&path).unwrap();
    push(&mut p, src, &translucent());
    assert!(!path.exists());
    assert_eq!(p.node::<PictureOutput>(out).unwrap().frames_received(), 2);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn save_failure_is_reported_to_the_callback() {
    let dir = temp_dir("picture_output_missing");
    let path = dir.join("nested").join("frame.jpg");
    let mut output = PictureOutput::new();
    let result: Arc<Mutex<Option<bool>>> = Arc::default();
    let slot = Arc::clone(&result);
    output.save_next_frame_to_path_with(&path, PictureFileFormat::Jpeg, move |r| {
        *slot.lock().unwrap() = Some(r.is_ok());
    });

    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());
    let out = p.add_node(output);
    p.add_target(src, out, 0).unwrap();
    push(&mut p, src, &translucent());
    assert_eq!(*result.lock().unwrap(), Some(false));
}

#[test]
fn stored_framebuffer_supports_synchronous_capture() {
    let mut p = Pipeline::cpu();
    let src = p.add_node(RawDataInput::new());
    let mut output = PictureOutput::new();
    output.keep_image_for_synchronous_capture = true;
    output.export_with_alpha = true;
    let out = p.add_node(output);
    p.add_target(src, out, 0).unwrap();

    assert!(matches!(
        PictureOutput::capture_stored_image(&mut p, out),
        Err(LumaError::Validation(_))
    ));

    push(&mut p, src, &translucent());
    let first = p.node::<PictureOutput>(out).unwrap().stored_framebuffer().unwrap();
    push(&mut p, src, &translucent());
    let second = p.node::<PictureOutput>(out).unwrap().stored_framebuffer().unwrap();
    assert_eq!(p.cache().ref_count(second), Some(1));
    assert_ne!(p.cache().ref_count(first), Some(1));
    assert_eq!(p.cache().locked_count(), 1);

    let queue = ProcessingQueue::spawn(p, "luma-test-capture").unwrap();
    let captured = PictureOutput::synchronous_image_capture(&queue.handle(), out).unwrap();
    assert_eq!(captured, translucent());

    let mut p = queue.shutdown().unwrap();
    p.remove_node(out).unwrap();
    assert_eq!(p.cache().locked_count(), 0);
}

#[test]
fn filter_image_runs_a_chain_once_and_cleans_up() {
    let mut p = Pipeline::cpu();
    let transform = TransformOperation::new(&mut p).unwrap();
    let transform = p.add_node(transform);
    let before = p.node_count();

    let img = translucent();
    assert_eq!(filter_image(&mut p, &img, &[transform]).unwrap(), img);
    assert_eq!(filter_image(&mut p, &img, &[transform]).unwrap(), img);
    assert_eq!(filter_image(&mut p, &img, &[]).unwrap(), img);

    assert_eq!(p.node_count(), before);
    assert!(p.targets(transform).is_empty());
    assert_eq!(p.cache().locked_count(), 0);
}

#[test]
fn filter_image_unlinks_only_the_edges_it_added() {
    let mut p = Pipeline::cpu();
    let ops: Vec<NodeId> = (0..3)
        .map(|_| {
            let op = TransformOperation::new(&mut p).unwrap();
            p.add_node(op)
        })
        .collect();
    // the first link is the caller's own and survives
    p.add_target(ops[0], ops[1], 0).unwrap();

    let img = translucent();
    assert_eq!(filter_image(&mut p, &img, &ops).unwrap(), img);

    assert_eq!(p.sources(ops[1]), vec![(0, ops[0])]);
    assert!(p.targets(ops[1]).is_empty());
    assert!(p.sources(ops[2]).is_empty());
    assert!(p.targets(ops[2]).is_empty());
    assert!(p.sources(ops[0]).is_empty());

    // running again wires and unwires the same way
    assert_eq!(filter_image(&mut p, &img, &ops).unwrap(), img);
    assert_eq!(p.sources(ops[1]), vec![(0, ops[0])]);
    assert!(p.sources(ops[2]).is_empty());
}
