use super::*;

#[test]
fn rotation_table_is_symmetric_for_quarter_turns() {
    use ImageOrientation::*;
    let all = [Portrait, PortraitUpsideDown, LandscapeLeft, LandscapeRight];
    for a in all {
        assert_eq!(a.rotation_needed_for(a), Rotation::NoRotation);
        for b in all {
            let there = a.rotation_needed_for(b);
            let back = b.rotation_needed_for(a);
            match there {
                Rotation::RotateClockwise => assert_eq!(back, Rotation::RotateCounterclockwise),
                Rotation::RotateCounterclockwise => assert_eq!(back, Rotation::RotateClockwise),
                other => assert_eq!(back, other),
            }
        }
    }
    assert_eq!(
        Portrait.rotation_needed_for(LandscapeLeft),
        Rotation::RotateCounterclockwise
    );
    assert_eq!(
        PortraitUpsideDown.rotation_needed_for(LandscapeRight),
        Rotation::RotateCounterclockwise
    );
}

#[test]
fn only_quarter_turns_flip_dimensions() {
    let size = GlSize::new(640, 480).unwrap();
    assert_eq!(Rotation::Rotate180.rotated_size(size), size);
    assert_eq!(Rotation::FlipVertically.rotated_size(size), size);
    assert_eq!(
        Rotation::RotateClockwise.rotated_size(size),
        GlSize::new(480, 640).unwrap()
    );
    assert!(Rotation::RotateClockwiseAndFlipHorizontally.flips_dimensions());
}

#[test]
fn no_rotation_coordinates_follow_strip_order() {
    let t = Rotation::NoRotation.texture_coordinates();
    // bottom-left corner samples texel origin, top-right samples (1,1)
    assert_eq!(&t[0..2], &[0.0, 0.0]);
    assert_eq!(&t[6..8], &[1.0, 1.0]);
    let r = Rotation::Rotate180.texture_coordinates();
    assert_eq!(&r[0..2], &[1.0, 1.0]);
}
