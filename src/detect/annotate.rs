//! Bounding-box rendering for annotated output images.
//!
//! Inputs that are already JPEG or PNG keep their file name. Anything else
//! (GIF) is re-encoded and saved as `<stem>.jpg`, which is why the output
//! locator has to try a `.jpg` candidate after the exact name.
//!
//! Each box gets a `<label> <confidence>` tag drawn with the bundled DejaVu
//! Sans Mono font.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ab_glyph::FontRef;
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::labels::class_name;
use crate::detect::result::RawDetection;

const LINE_WIDTH: i32 = 3;
const LABEL_SCALE: f32 = 14.0;
const LABEL_PAD: i32 = 2;
const LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

static LABEL_FONT_BYTES: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono-Bold.ttf");

fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(LABEL_FONT_BYTES) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("label font unusable, drawing boxes only: {}", err);
            None
        }
    })
    .as_ref()
}

/// Tag text for one detection, e.g. `helmet 0.91`.
pub fn label_text(det: &RawDetection) -> String {
    match class_name(det.class_index) {
        Some(name) => format!("{} {:.2}", name, det.confidence),
        None => format!("class {} {:.2}", det.class_index, det.confidence),
    }
}

/// Filled tag above the box, or inside its top edge when there is no room.
fn draw_label(canvas: &mut RgbImage, font: &FontRef<'_>, text: &str, x: i32, y: i32, color: Rgb<u8>) {
    let (tw, th) = text_size(LABEL_SCALE, font, text);
    let width = tw as i32 + 2 * LABEL_PAD;
    let height = th as i32 + 2 * LABEL_PAD;
    let top = if y - height >= 0 { y - height } else { y };
    draw_filled_rect_mut(
        canvas,
        Rect::at(x, top).of_size(width as u32, height as u32),
        color,
    );
    draw_text_mut(
        canvas,
        LABEL_TEXT,
        x + LABEL_PAD,
        top + LABEL_PAD,
        LABEL_SCALE,
        font,
        text,
    );
}

fn class_color(class_index: usize) -> Rgb<u8> {
    // "no-*" classes (4..=8) are violations and get warm colours.
    let (r, g, b) = match class_index {
        0 => (0, 160, 255),
        1 => (0, 200, 120),
        2 => (120, 80, 255),
        3 => (0, 255, 0),
        4 => (255, 140, 0),
        5 => (255, 90, 0),
        6 => (255, 0, 160),
        7 => (255, 0, 0),
        8 => (220, 20, 60),
        9 => (255, 255, 0),
        _ => (128, 128, 128),
    };
    Rgb([r, g, b])
}

/// File name the annotated copy of `source` is saved under.
pub fn annotated_file_name(source: &Path) -> Result<String> {
    let file_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("source path {} has no file name", source.display()))?;
    let ext = source
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") | Some("png") => Ok(file_name.to_string()),
        _ => {
            let stem = source
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("image");
            Ok(format!("{stem}.jpg"))
        }
    }
}

/// Draw `boxes` and their tags onto a copy of `image`.
pub fn draw_boxes(image: &RgbImage, boxes: &[RawDetection]) -> RgbImage {
    let mut canvas = image.clone();
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    if w == 0 || h == 0 {
        return canvas;
    }
    for det in boxes {
        let x_min = (det.x1.min(det.x2).round() as i32).clamp(0, w - 1);
        let y_min = (det.y1.min(det.y2).round() as i32).clamp(0, h - 1);
        let x_max = (det.x1.max(det.x2).round() as i32).clamp(0, w - 1);
        let y_max = (det.y1.max(det.y2).round() as i32).clamp(0, h - 1);
        let color = class_color(det.class_index);
        for t in 0..LINE_WIDTH {
            let rw = x_max - x_min - 2 * t;
            let rh = y_max - y_min - 2 * t;
            if rw < 1 || rh < 1 {
                break;
            }
            let rect = Rect::at(x_min + t, y_min + t).of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
        if let Some(font) = label_font() {
            draw_label(&mut canvas, font, &label_text(det), x_min, y_min, color);
        }
    }
    canvas
}

/// Render `boxes` onto `image` and save it into `save_dir`.
pub fn save_annotated(
    image: &RgbImage,
    boxes: &[RawDetection],
    save_dir: &Path,
    source: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("failed to create output dir {}", save_dir.display()))?;
    let out = save_dir.join(annotated_file_name(source)?);
    let annotated = draw_boxes(image, boxes);
    annotated
        .save(&out)
        .with_context(|| format!("failed to write annotated image {}", out.display()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_jpeg_and_png_names() {
        assert_eq!(
            annotated_file_name(Path::new("uploads/site.png")).unwrap(),
            "site.png"
        );
        assert_eq!(
            annotated_file_name(Path::new("uploads/site.JPEG")).unwrap(),
            "site.JPEG"
        );
    }

    #[test]
    fn normalizes_gif_to_jpg() {
        assert_eq!(
            annotated_file_name(Path::new("uploads/crew.gif")).unwrap(),
            "crew.jpg"
        );
    }

    #[test]
    fn draws_box_outline_in_class_color() {
        let image = RgbImage::new(96, 96);
        let boxes = vec![RawDetection::new([4.0, 40.0, 60.0, 90.0], 0.9, 7)];
        let out = draw_boxes(&image, &boxes);
        assert_eq!(*out.get_pixel(4, 60), Rgb([255, 0, 0]));
        assert_eq!(*out.get_pixel(30, 70), Rgb([0, 0, 0]));
    }

    #[test]
    fn tags_each_box_with_label_and_confidence() {
        let det = RawDetection::new([10.0, 40.0, 80.0, 90.0], 0.913, 3);
        assert_eq!(label_text(&det), "helmet 0.91");
        assert_eq!(
            label_text(&RawDetection::new([0.0, 0.0, 1.0, 1.0], 0.5, 42)),
            "class 42 0.50"
        );

        let image = RgbImage::from_pixel(128, 128, Rgb([255, 255, 255]));
        let out = draw_boxes(&image, &[det]);
        let green = Rgb([0, 255, 0]);
        // tag background sits directly above the box, starting at its left edge
        assert_eq!(*out.get_pixel(10, 39), green);
        let tag_band = (20..40).flat_map(|y| (10..100).map(move |x| (x, y)));
        let (fill, ink) = tag_band.fold((0, 0), |(fill, ink), (x, y)| {
            let p = out.get_pixel(x, y);
            (
                fill + usize::from(*p == green),
                ink + usize::from(p.0.iter().all(|c| *c < 100)),
            )
        });
        assert!(fill > 0);
        assert!(ink > 0, "label text should be rendered in dark ink");
    }

    #[test]
    fn clamps_boxes_outside_the_image() {
        let image = RgbImage::new(16, 16);
        let boxes = vec![RawDetection::new([-50.0, -50.0, 500.0, 500.0], 0.5, 3)];
        let out = draw_boxes(&image, &boxes);
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 255, 0]));
    }

    #[test]
    fn writes_gif_input_as_jpg() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(8, 8);
        let out = save_annotated(&image, &[], &dir.path().join("exp"), Path::new("a/crew.gif"))
            .unwrap();
        assert_eq!(out, dir.path().join("exp").join("crew.jpg"));
        assert!(out.exists());
    }
}
