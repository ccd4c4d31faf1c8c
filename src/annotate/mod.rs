//! Annotation pipeline
//!
//! Takes the raw OCR detections for an image, keeps the ones above the
//! confidence threshold, draws a closed quadrilateral outline plus an index
//! label for each survivor, and returns the accepted results in the order
//! the engine produced them.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use std::path::Path;
use tracing::{debug, info};

use crate::ocr::Detection;

/// Well-known scalable font locations, tried in order when the config does
/// not name a font file.
const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// One accepted detection, as shown in the result list.
///
/// `index` is 1-based and dense over accepted results only: rejected
/// detections never consume an index.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedResult {
    pub index: u32,
    pub text: String,
    pub confidence: f32,
}

/// Font used for the index labels drawn next to each box.
pub enum LabelFont {
    /// A scalable font rendered through `ab_glyph`.
    Scalable(FontVec),
    /// Minimal built-in digit glyphs, used when no scalable font loads.
    Bitmap,
}

impl LabelFont {
    /// Load the label font: the configured path first, then well-known
    /// system locations, then the built-in bitmap digits. Never fails.
    pub fn load(preferred: Option<&Path>) -> Self {
        let candidates = preferred
            .into_iter()
            .map(|p| p.to_path_buf())
            .chain(SYSTEM_FONT_PATHS.iter().map(std::path::PathBuf::from));

        for path in candidates {
            if let Ok(data) = std::fs::read(&path) {
                if let Ok(font) = FontVec::try_from_vec(data) {
                    info!("Loaded label font from {:?}", path);
                    return LabelFont::Scalable(font);
                }
            }
        }

        debug!("No scalable font available, using built-in bitmap digits");
        LabelFont::Bitmap
    }

    /// Draw `text` with its top-left corner at (x, y), clipped to the image.
    fn draw(&self, image: &mut RgbImage, x: i32, y: i32, scale: f32, color: Rgb<u8>, text: &str) {
        match self {
            LabelFont::Scalable(font) => {
                draw_text_mut(image, color, x, y, PxScale::from(scale), font, text);
            }
            LabelFont::Bitmap => {
                let px = ((scale / 6.0).round() as i32).max(1);
                draw_bitmap_digits(image, x, y, px, color, text);
            }
        }
    }
}

/// Options controlling the annotation pass.
pub struct AnnotateOptions<'a> {
    /// Detections with `confidence <= threshold` are dropped (strict `>`).
    pub confidence_threshold: f32,
    /// Outline and label color.
    pub box_color: Rgb<u8>,
    /// Outline thickness in pixels.
    pub line_thickness: u32,
    /// Whether to draw the 1-based index at each quad's first corner.
    pub draw_index_labels: bool,
    /// Label height in pixels.
    pub label_scale: f32,
    pub font: &'a LabelFont,
}

/// Annotate `image` with every detection above the confidence threshold.
///
/// Returns a new image (the input is never touched) together with the
/// accepted results in insertion order. Drawing and listing are atomic per
/// detection: a detection either contributes one outline, one label, and one
/// list entry, or nothing at all. An empty `detections` slice yields an
/// unmodified copy and an empty list.
pub fn annotate(
    image: &RgbImage,
    detections: &[Detection],
    opts: &AnnotateOptions,
) -> (RgbImage, Vec<AcceptedResult>) {
    let mut annotated = image.clone();
    let mut accepted = Vec::new();
    let mut index: u32 = 1;

    for detection in detections {
        if detection.confidence <= opts.confidence_threshold {
            continue;
        }

        draw_quad_outline(
            &mut annotated,
            &detection.region,
            opts.box_color,
            opts.line_thickness,
        );

        if opts.draw_index_labels {
            let (cx, cy) = detection.region[0];
            opts.font.draw(
                &mut annotated,
                cx.round() as i32,
                cy.round() as i32,
                opts.label_scale,
                opts.box_color,
                &index.to_string(),
            );
        }

        accepted.push(AcceptedResult {
            index,
            text: detection.text.clone(),
            confidence: detection.confidence,
        });
        index += 1;
    }

    debug!(
        "Annotated {} of {} detections (threshold {})",
        accepted.len(),
        detections.len(),
        opts.confidence_threshold
    );

    (annotated, accepted)
}

/// Draw a closed polyline over the four quad corners, in the order given and
/// back to the first corner. Thickness is built up by offsetting the segment
/// one pixel at a time on both axes.
fn draw_quad_outline(image: &mut RgbImage, quad: &[(f32, f32); 4], color: Rgb<u8>, thickness: u32) {
    for i in 0..quad.len() {
        let (x1, y1) = quad[i];
        let (x2, y2) = quad[(i + 1) % quad.len()];

        for t in 0..thickness.max(1) {
            let offset = t as f32;
            draw_line_segment_mut(image, (x1 + offset, y1), (x2 + offset, y2), color);
            draw_line_segment_mut(image, (x1, y1 + offset), (x2, y2 + offset), color);
        }
    }
}

/// 3x5 digit glyphs, one row per byte, low three bits used.
const DIGIT_GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];

/// Render decimal digits using the built-in glyphs, `px` screen pixels per
/// glyph pixel. Non-digit characters are skipped; out-of-bounds pixels are
/// clipped.
fn draw_bitmap_digits(image: &mut RgbImage, x: i32, y: i32, px: i32, color: Rgb<u8>, text: &str) {
    let (width, height) = image.dimensions();
    let mut pen_x = x;

    for ch in text.chars() {
        let Some(digit) = ch.to_digit(10) else {
            continue;
        };
        let glyph = &DIGIT_GLYPHS[digit as usize];

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for dy in 0..px {
                    for dx in 0..px {
                        let sx = pen_x + col * px + dx;
                        let sy = y + row as i32 * px + dy;
                        if sx >= 0 && sy >= 0 && (sx as u32) < width && (sy as u32) < height {
                            image.put_pixel(sx as u32, sy as u32, color);
                        }
                    }
                }
            }
        }

        // One glyph column of spacing between digits.
        pen_x += 4 * px;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn detection(quad: [(f32, f32); 4], text: &str, confidence: f32) -> Detection {
        Detection {
            region: quad,
            text: text.to_string(),
            confidence,
        }
    }

    fn options(font: &LabelFont) -> AnnotateOptions<'_> {
        AnnotateOptions {
            confidence_threshold: 0.4,
            box_color: RED,
            line_thickness: 1,
            draw_index_labels: true,
            label_scale: 12.0,
            font,
        }
    }

    #[test]
    fn single_high_confidence_detection_is_listed_and_drawn() {
        let image = blank(20, 10);
        let dets = vec![detection(
            [(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (0.0, 5.0)],
            "AB1234",
            0.92,
        )];
        let font = LabelFont::Bitmap;
        let mut opts = options(&font);
        opts.draw_index_labels = false;

        let (annotated, results) = annotate(&image, &dets, &opts);

        assert_eq!(
            results,
            vec![AcceptedResult {
                index: 1,
                text: "AB1234".to_string(),
                confidence: 0.92,
            }]
        );
        // Outline pixels landed on the quad edges.
        assert_eq!(*annotated.get_pixel(0, 0), RED);
        assert_eq!(*annotated.get_pixel(10, 0), RED);
        assert_eq!(*annotated.get_pixel(10, 5), RED);
        assert_eq!(*annotated.get_pixel(0, 5), RED);
        assert_eq!(*annotated.get_pixel(5, 0), RED);
        // Interior untouched.
        assert_eq!(*annotated.get_pixel(5, 3), Rgb([255, 255, 255]));
    }

    #[test]
    fn threshold_filter_is_strictly_greater_than() {
        let image = blank(30, 30);
        let dets = vec![
            detection([(1.0, 1.0), (8.0, 1.0), (8.0, 6.0), (1.0, 6.0)], "KEEP", 0.5),
            detection(
                [(1.0, 10.0), (8.0, 10.0), (8.0, 16.0), (1.0, 16.0)],
                "DROP",
                0.3,
            ),
            detection(
                [(1.0, 20.0), (8.0, 20.0), (8.0, 26.0), (1.0, 26.0)],
                "EDGE",
                0.4,
            ),
        ];
        let font = LabelFont::Bitmap;
        let mut opts = options(&font);
        opts.draw_index_labels = false;
        let (annotated, results) = annotate(&image, &dets, &opts);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 1);
        assert_eq!(results[0].text, "KEEP");
        // Rejected quads left no marks.
        assert_eq!(*annotated.get_pixel(1, 10), Rgb([255, 255, 255]));
        assert_eq!(*annotated.get_pixel(1, 20), Rgb([255, 255, 255]));
    }

    #[test]
    fn indices_are_dense_over_accepted_results_only() {
        let image = blank(40, 40);
        let dets = vec![
            detection([(0.0, 0.0), (5.0, 0.0), (5.0, 3.0), (0.0, 3.0)], "A", 0.9),
            detection([(0.0, 8.0), (5.0, 8.0), (5.0, 11.0), (0.0, 11.0)], "B", 0.1),
            detection(
                [(0.0, 16.0), (5.0, 16.0), (5.0, 19.0), (0.0, 19.0)],
                "C",
                0.7,
            ),
            detection(
                [(0.0, 24.0), (5.0, 24.0), (5.0, 27.0), (0.0, 27.0)],
                "D",
                0.41,
            ),
        ];
        let font = LabelFont::Bitmap;
        let (_, results) = annotate(&image, &dets, &options(&font));

        let got: Vec<(u32, &str)> = results.iter().map(|r| (r.index, r.text.as_str())).collect();
        assert_eq!(got, vec![(1, "A"), (2, "C"), (3, "D")]);
    }

    #[test]
    fn empty_detections_yield_unmodified_copy_and_empty_list() {
        let image = blank(10, 10);
        let font = LabelFont::Bitmap;
        let (annotated, results) = annotate(&image, &[], &options(&font));

        assert!(results.is_empty());
        assert_eq!(annotated.as_raw(), image.as_raw());
    }

    #[test]
    fn input_image_is_never_mutated() {
        let image = blank(20, 20);
        let before = image.clone();
        let dets = vec![detection(
            [(2.0, 2.0), (12.0, 2.0), (12.0, 9.0), (2.0, 9.0)],
            "X",
            0.99,
        )];
        let font = LabelFont::Bitmap;
        let _ = annotate(&image, &dets, &options(&font));

        assert_eq!(image.as_raw(), before.as_raw());
    }

    #[test]
    fn annotation_is_idempotent() {
        let image = blank(32, 24);
        let dets = vec![
            detection([(1.0, 1.0), (9.0, 1.0), (9.0, 7.0), (1.0, 7.0)], "ONE", 0.8),
            detection(
                [(4.0, 12.0), (20.0, 12.0), (20.0, 20.0), (4.0, 20.0)],
                "TWO",
                0.6,
            ),
        ];
        let font = LabelFont::Bitmap;
        let opts = options(&font);

        let (first_img, first_results) = annotate(&image, &dets, &opts);
        let (second_img, second_results) = annotate(&image, &dets, &opts);

        assert_eq!(first_img.as_raw(), second_img.as_raw());
        assert_eq!(first_results, second_results);
    }

    #[test]
    fn skewed_quad_corners_are_outlined() {
        // Not axis-aligned: the outline must follow the given corner order.
        let image = blank(40, 40);
        let dets = vec![detection(
            [(5.0, 8.0), (30.0, 4.0), (33.0, 14.0), (8.0, 18.0)],
            "TILT",
            0.9,
        )];
        let font = LabelFont::Bitmap;
        let mut opts = options(&font);
        opts.draw_index_labels = false;
        let (annotated, _) = annotate(&image, &dets, &opts);

        assert_eq!(*annotated.get_pixel(5, 8), RED);
        assert_eq!(*annotated.get_pixel(30, 4), RED);
        assert_eq!(*annotated.get_pixel(33, 14), RED);
        assert_eq!(*annotated.get_pixel(8, 18), RED);
    }

    #[test]
    fn labels_near_the_border_are_clipped_not_panicking() {
        let image = blank(8, 8);
        let dets = vec![detection(
            [(-3.0, -3.0), (6.0, -3.0), (6.0, 4.0), (-3.0, 4.0)],
            "EDGE",
            0.9,
        )];
        let font = LabelFont::Bitmap;
        let (annotated, results) = annotate(&image, &dets, &options(&font));

        assert_eq!(results.len(), 1);
        assert_eq!(annotated.dimensions(), (8, 8));
    }

    #[test]
    fn bitmap_digits_render_within_bounds() {
        let mut image = blank(30, 10);
        draw_bitmap_digits(&mut image, 1, 1, 1, RED, "10");

        // '1' center column, '0' ring. Digit cell is 3 wide + 1 spacing.
        assert_eq!(*image.get_pixel(2, 1), RED); // top of '1'
        assert_eq!(*image.get_pixel(5, 1), RED); // top-left of '0'
        assert_eq!(*image.get_pixel(6, 2), Rgb([255, 255, 255])); // hole of '0'
    }

    #[test]
    fn bitmap_font_skips_non_digits() {
        let mut image = blank(10, 10);
        let before = image.clone();
        draw_bitmap_digits(&mut image, 2, 2, 1, RED, "-x");
        assert_eq!(image.as_raw(), before.as_raw());
    }

    #[test]
    fn font_load_falls_back_without_a_font_file() {
        let missing = Path::new("/definitely/not/a/font.ttf");
        // Depending on the host this may still find a system font; either
        // variant must be usable for drawing.
        let font = LabelFont::load(Some(missing));
        let mut image = blank(20, 20);
        font.draw(&mut image, 2, 2, 12.0, RED, "7");
    }
}
