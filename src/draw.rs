use crate::KeyPoint;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing;

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 64, 64]),
    Rgb([64, 255, 64]),
    Rgb([64, 128, 255]),
    Rgb([255, 255, 0]),
    Rgb([0, 255, 255]),
    Rgb([255, 0, 255]),
];

/// Render keypoints onto a colour copy of `image`.
///
/// Each keypoint is a circle with the keypoint's diameter. Oriented keypoints
/// get a radius drawn in the direction of their angle; keypoints smaller than
/// two pixels are drawn as a cross. Colours cycle by octave.
pub fn draw_keypoints(image: &GrayImage, keypoints: &[KeyPoint]) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
    for kp in keypoints {
        let color = PALETTE[kp.octave.rem_euclid(PALETTE.len() as i32) as usize];
        let (x, y) = kp.point;
        let radius = kp.size / 2.0;
        if radius < 1.0 {
            drawing::draw_cross_mut(&mut canvas, color, x.round() as i32, y.round() as i32);
            continue;
        }
        drawing::draw_hollow_circle_mut(
            &mut canvas,
            (x.round() as i32, y.round() as i32),
            radius.round() as i32,
            color,
        );
        if kp.is_oriented() {
            let theta = kp.angle.to_radians();
            let tip = (x + radius * theta.cos(), y + radius * theta.sin());
            drawing::draw_line_segment_mut(&mut canvas, (x, y), tip, color);
        }
    }
    canvas
}
