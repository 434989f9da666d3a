use super::*;

#[test]
fn gl_size_rejects_zero_dimensions() {
    assert!(GlSize::new(0, 4).is_err());
    assert!(GlSize::new(4, 0).is_err());
    let s = GlSize::new(3, 2).unwrap();
    assert_eq!(s.pixel_count(), 6);
    assert_eq!(s.byte_len_rgba8(), 24);
    assert_eq!(s.transposed(), GlSize::new(2, 3).unwrap());
}

#[test]
fn position_distance_treats_missing_z_as_zero() {
    let a = Position::new(0.0, 0.0);
    let b = Position::new_3d(3.0, 4.0, 0.0);
    assert_eq!(a.distance(b), 5.0);
    assert_eq!(Position::new_3d(0.0, 0.0, 2.0).distance(a), 2.0);
}

#[test]
fn ndc_and_texture_coordinates_are_inverse() {
    let p = Position::new(-1.0, 1.0);
    let t = p.ndc_to_texture_coordinate();
    assert_eq!(t, Position::new(0.0, 1.0));
    assert_eq!(t.texture_to_ndc_coordinate(), p);
    assert_eq!(Position::CENTER.texture_to_ndc_coordinate(), Position::ZERO);

    let screen = Position::ZERO.ndc_to_screen(Size::new(200.0, 100.0));
    assert_eq!(screen, Point::new(100.0, 50.0));
}

#[test]
fn projection_divides_by_w() {
    let mut m = Matrix4x4::IDENTITY;
    m.m44 = 2.0;
    let p = Position::new_3d(2.0, 4.0, 6.0).applied_projection(&m);
    assert_eq!(p, Position::new_3d(1.0, 2.0, 3.0));

    let back = p.applied_unprojection(&m).unwrap();
    assert!((back.x - 2.0).abs() < 1e-5);
    assert!((back.y - 4.0).abs() < 1e-5);
}

#[test]
fn media_time_orders_and_converts() {
    let a = MediaTime::from_secs_f64(1.5);
    assert_eq!(a.as_micros(), 1_500_000);
    assert!(a > MediaTime::from_millis(1499));
    assert_eq!(a.as_secs_f64(), 1.5);
    assert!(!MediaTime::ZERO.is_positive());
    assert_eq!(
        MediaTime::from_millis(100).abs_diff(MediaTime::from_millis(250)),
        MediaTime::from_millis(150)
    );
}

#[test]
fn color_quantizes_with_clamping() {
    assert_eq!(Color::new(1.5, 0.5, -1.0, 1.0).to_rgba8(), [255, 128, 0, 255]);
}
