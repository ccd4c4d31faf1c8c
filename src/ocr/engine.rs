//! OCR engine
//!
//! Text detection (DBNet probability map, thresholded into connected
//! components) followed by per-region text recognition (CTC decoding of the
//! recognizer output, with a mean softmax probability as the confidence).
//!
//! Everything in here is engine-internal: callers only see `Detection`
//! values with a quad, a string, and a confidence in [0, 1].

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array4;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

use super::models::{LanguagePack, ModelManager};
use super::session::OnnxSession;
use super::{Detection, Quad};
use crate::config::OcrSettings;

/// Longest image side fed to the detector; larger inputs are scaled down.
const DET_LIMIT_SIDE: u32 = 960;
/// ImageNet-style channel normalization used by the detection model.
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Probability-map binarization threshold.
const DET_BINARY_THRESHOLD: f32 = 0.3;
/// Minimum mean probability inside a component for it to count as text.
const DET_BOX_MIN_SCORE: f32 = 0.5;
/// Minimum component side length in map pixels.
const DET_MIN_SIDE: u32 = 3;
/// Expansion ratio recovering the full text extent from the shrunk map.
const DET_UNCLIP_RATIO: f32 = 1.5;

/// Recognizer input geometry (NCHW, grayscale replicated to 3 channels).
const REC_HEIGHT: u32 = 48;
const REC_WIDTH: u32 = 320;

/// PaddleOCR text detection + recognition behind one `recognize` call.
pub struct OcrEngine {
    det: OnnxSession,
    rec: OnnxSession,
    charset: Vec<String>,
    language: LanguagePack,
}

impl OcrEngine {
    /// Build the engine for the configured language pack, downloading any
    /// missing model files first.
    pub fn from_settings(settings: &OcrSettings) -> Result<Self> {
        let manager = ModelManager::new()?;
        Self::with_models(&manager, settings.language)
    }

    /// Build the engine from a specific model directory.
    pub fn with_models(manager: &ModelManager, language: LanguagePack) -> Result<Self> {
        let paths = manager.ensure_pack(language)?;

        let det = OnnxSession::new(&paths.detection)?;
        let rec = OnnxSession::new(&paths.recognition)?;
        let dict = std::fs::read_to_string(&paths.dictionary)
            .with_context(|| format!("Failed to read dictionary {:?}", paths.dictionary))?;
        let charset = parse_charset(&dict);

        info!(
            "OCR engine ready: {} ({} glyphs)",
            language.display_name(),
            charset.len()
        );

        Ok(Self {
            det,
            rec,
            charset,
            language,
        })
    }

    pub fn language(&self) -> LanguagePack {
        self.language
    }

    /// Run detection and recognition over a full image.
    ///
    /// Detections come back in reading order (top-to-bottom, then
    /// left-to-right); regions whose transcription is empty are dropped.
    pub fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let start = Instant::now();

        let quads = self.detect(image)?;
        let mut detections = Vec::with_capacity(quads.len());
        for quad in &quads {
            if let Some((text, confidence)) = self.recognize_region(image, quad)? {
                detections.push(Detection {
                    region: *quad,
                    text,
                    confidence,
                });
            }
        }

        debug!(
            "OCR complete in {:?}: {} regions, {} transcribed",
            start.elapsed(),
            quads.len(),
            detections.len()
        );
        Ok(detections)
    }

    /// Text detection: probability map -> component boxes -> source-image
    /// quads, sorted into reading order.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Quad>> {
        let (orig_w, orig_h) = image.dimensions();
        let (det_w, det_h) = det_input_size(orig_w, orig_h);
        let resized = image::imageops::resize(image, det_w, det_h, FilterType::Triangle);

        let input = det_input_tensor(&resized);
        let (dims, data) = self
            .det
            .run([1, 3, det_h as usize, det_w as usize], input)?;

        anyhow::ensure!(dims.len() >= 2, "unexpected detection output rank {:?}", dims);
        let map_h = dims[dims.len() - 2];
        let map_w = dims[dims.len() - 1];
        anyhow::ensure!(
            data.len() >= map_h * map_w,
            "detection output smaller than its declared shape"
        );

        let boxes = component_boxes(&data[..map_h * map_w], map_w, map_h);

        let scale_x = orig_w as f32 / map_w as f32;
        let scale_y = orig_h as f32 / map_h as f32;
        let mut quads: Vec<Quad> = boxes
            .iter()
            .map(|b| {
                let e = expand_box(b, map_w as f32, map_h as f32);
                [
                    (e.x0 * scale_x, e.y0 * scale_y),
                    (e.x1 * scale_x, e.y0 * scale_y),
                    (e.x1 * scale_x, e.y1 * scale_y),
                    (e.x0 * scale_x, e.y1 * scale_y),
                ]
            })
            .collect();

        quads.sort_by(|a, b| {
            a[0].1
                .total_cmp(&b[0].1)
                .then_with(|| a[0].0.total_cmp(&b[0].0))
        });

        Ok(quads)
    }

    /// Recognize the text inside one quad. Returns None for regions that
    /// fall outside the image or transcribe to nothing.
    fn recognize_region(&mut self, image: &RgbImage, quad: &Quad) -> Result<Option<(String, f32)>> {
        let Some((x, y, w, h)) = quad_bounds(quad, image.dimensions()) else {
            return Ok(None);
        };

        let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();
        let gray = image::imageops::grayscale(&crop);
        let input = rec_input_tensor(&gray);

        let (dims, data) = self
            .rec
            .run([1, 3, REC_HEIGHT as usize, REC_WIDTH as usize], input)?;

        let (text, confidence) = decode_ctc(&data, &dims, &self.charset)?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some((text, confidence)))
        }
    }
}

/// Detector input size: longest side capped at `DET_LIMIT_SIDE`, both sides
/// rounded to a multiple of 32 (the model's stride).
fn det_input_size(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let scale = if longest > DET_LIMIT_SIDE {
        DET_LIMIT_SIDE as f32 / longest as f32
    } else {
        1.0
    };
    (
        round_to_stride(width as f32 * scale),
        round_to_stride(height as f32 * scale),
    )
}

fn round_to_stride(side: f32) -> u32 {
    (((side / 32.0).round() as u32).max(1)) * 32
}

/// NCHW float tensor with per-channel mean/std normalization.
fn det_input_tensor(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (v - DET_MEAN[c]) / DET_STD[c];
        }
    }

    tensor.into_raw_vec_and_offset().0
}

/// Axis-aligned box in probability-map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DetBox {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    score: f32,
}

/// Threshold the probability map and turn each connected component into a
/// scored bounding box. Components that are tiny or low-scoring are noise.
fn component_boxes(prob: &[f32], width: usize, height: usize) -> Vec<DetBox> {
    let mut binary = GrayImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            if prob[y * width + x] > DET_BINARY_THRESHOLD {
                binary.put_pixel(x as u32, y as u32, Luma([255u8]));
            }
        }
    }

    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    struct Acc {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        prob_sum: f32,
        count: u32,
    }
    let mut components: HashMap<u32, Acc> = HashMap::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let id = label.0[0];
        if id == 0 {
            continue;
        }
        let p = prob[y as usize * width + x as usize];
        let acc = components.entry(id).or_insert(Acc {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            prob_sum: 0.0,
            count: 0,
        });
        acc.min_x = acc.min_x.min(x);
        acc.min_y = acc.min_y.min(y);
        acc.max_x = acc.max_x.max(x);
        acc.max_y = acc.max_y.max(y);
        acc.prob_sum += p;
        acc.count += 1;
    }

    let mut boxes: Vec<DetBox> = components
        .values()
        .filter(|acc| {
            acc.max_x - acc.min_x + 1 >= DET_MIN_SIDE && acc.max_y - acc.min_y + 1 >= DET_MIN_SIDE
        })
        .map(|acc| DetBox {
            x0: acc.min_x as f32,
            y0: acc.min_y as f32,
            x1: (acc.max_x + 1) as f32,
            y1: (acc.max_y + 1) as f32,
            score: acc.prob_sum / acc.count.max(1) as f32,
        })
        .filter(|b| b.score > DET_BOX_MIN_SCORE)
        .collect();

    // Deterministic order before the caller re-sorts scaled quads.
    boxes.sort_by(|a, b| a.y0.total_cmp(&b.y0).then_with(|| a.x0.total_cmp(&b.x0)));
    boxes
}

/// Grow a shrunk component box back toward the full text extent, clamped to
/// the map bounds. The offset follows the DB unclip formula
/// `area * ratio / perimeter`.
fn expand_box(b: &DetBox, map_w: f32, map_h: f32) -> DetBox {
    let w = (b.x1 - b.x0).max(1.0);
    let h = (b.y1 - b.y0).max(1.0);
    let offset = DET_UNCLIP_RATIO * (w * h) / (2.0 * (w + h));

    DetBox {
        x0: (b.x0 - offset).max(0.0),
        y0: (b.y0 - offset).max(0.0),
        x1: (b.x1 + offset).min(map_w),
        y1: (b.y1 + offset).min(map_h),
        score: b.score,
    }
}

/// Clamp a quad's bounding rectangle to the image. None when nothing of the
/// region lies inside.
fn quad_bounds(quad: &Quad, (width, height): (u32, u32)) -> Option<(u32, u32, u32, u32)> {
    let xs = quad.iter().map(|p| p.0);
    let ys = quad.iter().map(|p| p.1);
    let x0 = xs.clone().fold(f32::INFINITY, f32::min).max(0.0);
    let y0 = ys.clone().fold(f32::INFINITY, f32::min).max(0.0);
    let x1 = xs.fold(f32::NEG_INFINITY, f32::max).min(width as f32);
    let y1 = ys.fold(f32::NEG_INFINITY, f32::max).min(height as f32);

    let x = x0.floor() as u32;
    let y = y0.floor() as u32;
    let w = (x1.ceil() as u32).saturating_sub(x);
    let h = (y1.ceil() as u32).saturating_sub(y);
    if w == 0 || h == 0 || x >= width || y >= height {
        return None;
    }
    Some((x, y, w.min(width - x), h.min(height - y)))
}

/// Resize a line crop to the recognizer geometry, preserving aspect ratio
/// and zero-padding on the right, normalized to [-1, 1] and replicated over
/// three channels.
fn rec_input_tensor(gray: &GrayImage) -> Vec<f32> {
    let (w, h) = gray.dimensions();
    let scaled_w = if w == 0 || h == 0 {
        1
    } else {
        ((REC_HEIGHT as f32 / h as f32 * w as f32).round() as u32).clamp(1, REC_WIDTH)
    };
    let resized = image::imageops::resize(gray, scaled_w, REC_HEIGHT, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, REC_HEIGHT as usize, REC_WIDTH as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let v = (pixel.0[0] as f32 / 255.0 - 0.5) / 0.5;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }

    tensor.into_raw_vec_and_offset().0
}

/// Dictionary file -> charset. One glyph per line; a trailing space entry is
/// appended because the recognizer reserves its last class for spaces.
fn parse_charset(dict: &str) -> Vec<String> {
    let mut charset: Vec<String> = dict
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    charset.push(" ".to_string());
    charset
}

/// CTC greedy decode with a softmax over each step. Class 0 is the blank;
/// repeated classes collapse unless separated by a blank. The confidence is
/// the mean probability of the emitted glyphs.
fn decode_ctc(data: &[f32], dims: &[usize], charset: &[String]) -> Result<(String, f32)> {
    let classes = charset.len() + 1;

    let mut shape: Vec<usize> = dims.to_vec();
    while shape.len() > 2 && shape.first() == Some(&1) {
        shape.remove(0);
    }
    let (steps, class_major) = match shape.as_slice() {
        [steps, c] if *c == classes => (*steps, false),
        [c, steps] if *c == classes => (*steps, true),
        other => anyhow::bail!(
            "recognizer output shape {:?} does not match charset of {} classes",
            other,
            classes
        ),
    };
    anyhow::ensure!(
        data.len() >= steps * classes,
        "recognizer output buffer shorter than its declared shape"
    );

    let logit = |step: usize, class: usize| -> f32 {
        if class_major {
            data[class * steps + step]
        } else {
            data[step * classes + class]
        }
    };

    let mut text = String::new();
    let mut prob_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut previous: Option<usize> = None;

    for step in 0..steps {
        let mut max_logit = f32::NEG_INFINITY;
        for class in 0..classes {
            max_logit = max_logit.max(logit(step, class));
        }

        let mut exp_sum = 0.0f32;
        let mut best_class = 0usize;
        let mut best_exp = 0.0f32;
        for class in 0..classes {
            let e = (logit(step, class) - max_logit).exp();
            exp_sum += e;
            if e > best_exp {
                best_exp = e;
                best_class = class;
            }
        }
        if exp_sum <= 0.0 {
            continue;
        }

        if best_class != 0 && previous != Some(best_class) {
            if let Some(glyph) = charset.get(best_class - 1) {
                text.push_str(glyph);
                prob_sum += best_exp / exp_sum;
                emitted += 1;
            }
        }
        previous = if best_class == 0 { None } else { Some(best_class) };
    }

    let confidence = if emitted > 0 {
        prob_sum / emitted as f32
    } else {
        0.0
    };
    Ok((text, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn det_input_size_rounds_to_stride() {
        assert_eq!(det_input_size(640, 480), (640, 480));
        assert_eq!(det_input_size(100, 50), (96, 64));
        // Longest side capped at the limit.
        let (w, h) = det_input_size(1920, 1080);
        assert!(w <= DET_LIMIT_SIDE && h <= DET_LIMIT_SIDE);
        assert_eq!(w % 32, 0);
        assert_eq!(h % 32, 0);
        // Tiny inputs never collapse below one stride.
        assert_eq!(det_input_size(5, 5), (32, 32));
    }

    #[test]
    fn det_tensor_is_nchw_normalized() {
        let image = RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0]));
        let tensor = det_input_tensor(&image);

        assert_eq!(tensor.len(), 3 * 2 * 2);
        let red = (1.0 - DET_MEAN[0]) / DET_STD[0];
        let green = (0.0 - DET_MEAN[1]) / DET_STD[1];
        assert!((tensor[0] - red).abs() < 1e-5);
        assert!((tensor[4] - green).abs() < 1e-5);
    }

    #[test]
    fn component_boxes_find_separate_blobs() {
        // 20x10 map with two high-probability blocks.
        let (w, h) = (20usize, 10usize);
        let mut prob = vec![0.0f32; w * h];
        for y in 1..4 {
            for x in 1..6 {
                prob[y * w + x] = 0.9;
            }
        }
        for y in 6..9 {
            for x in 10..17 {
                prob[y * w + x] = 0.8;
            }
        }

        let boxes = component_boxes(&prob, w, h);
        assert_eq!(boxes.len(), 2);
        assert_eq!((boxes[0].x0, boxes[0].y0, boxes[0].x1, boxes[0].y1), (1.0, 1.0, 6.0, 4.0));
        assert_eq!((boxes[1].x0, boxes[1].y0, boxes[1].x1, boxes[1].y1), (10.0, 6.0, 17.0, 9.0));
        assert!(boxes[0].score > 0.85);
    }

    #[test]
    fn component_boxes_drop_noise() {
        let (w, h) = (16usize, 16usize);
        let mut prob = vec![0.0f32; w * h];
        // Single-pixel speck: below the minimum side.
        prob[3 * w + 3] = 0.95;
        // Large but weak blob: barely above the binarization threshold,
        // below the box score cutoff.
        for y in 8..14 {
            for x in 2..12 {
                prob[y * w + x] = 0.35;
            }
        }

        assert!(component_boxes(&prob, w, h).is_empty());
    }

    #[test]
    fn expand_box_grows_and_clamps() {
        let b = DetBox {
            x0: 2.0,
            y0: 2.0,
            x1: 12.0,
            y1: 6.0,
            score: 0.9,
        };
        let e = expand_box(&b, 14.0, 8.0);
        assert!(e.x0 < b.x0 && e.y0 < b.y0);
        assert!(e.x1 > b.x1 && e.y1 > b.y1);
        assert!(e.x0 >= 0.0 && e.y0 >= 0.0);
        assert!(e.x1 <= 14.0 && e.y1 <= 8.0);
    }

    #[test]
    fn quad_bounds_clamps_to_image() {
        let quad = [(-5.0, -5.0), (20.0, -5.0), (20.0, 8.0), (-5.0, 8.0)];
        let (x, y, w, h) = quad_bounds(&quad, (10, 10)).unwrap();
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (10, 8));
    }

    #[test]
    fn quad_bounds_rejects_regions_outside_the_image() {
        let quad = [(20.0, 20.0), (30.0, 20.0), (30.0, 25.0), (20.0, 25.0)];
        assert!(quad_bounds(&quad, (10, 10)).is_none());
    }

    #[test]
    fn rec_tensor_pads_on_the_right() {
        // A square crop scales to 48x48; columns past that stay zero.
        let gray = GrayImage::from_pixel(10, 10, Luma([255u8]));
        let tensor = rec_input_tensor(&gray);

        assert_eq!(tensor.len(), 3 * REC_HEIGHT as usize * REC_WIDTH as usize);
        // First pixel: white -> +1 after normalization.
        assert!((tensor[0] - 1.0).abs() < 1e-4);
        // Far right of the first row is padding.
        assert_eq!(tensor[REC_WIDTH as usize - 1], 0.0);
    }

    #[test]
    fn parse_charset_appends_space() {
        let charset = parse_charset("A\nB\n1\n");
        assert_eq!(charset, vec!["A", "B", "1", " "]);
    }

    fn one_hot(rows: &[usize], classes: usize) -> Vec<f32> {
        let mut data = vec![0.0f32; rows.len() * classes];
        for (step, &class) in rows.iter().enumerate() {
            data[step * classes + class] = 10.0;
        }
        data
    }

    #[test]
    fn ctc_collapses_repeats_and_blanks() {
        let charset: Vec<String> = ["A", "B", " "].iter().map(|s| s.to_string()).collect();
        let classes = charset.len() + 1;
        // A A blank A B -> "AAB"
        let data = one_hot(&[1, 1, 0, 1, 2], classes);

        let (text, confidence) = decode_ctc(&data, &[1, 5, classes], &charset).unwrap();
        assert_eq!(text, "AAB");
        assert!(confidence > 0.99);
    }

    #[test]
    fn ctc_all_blank_is_empty_with_zero_confidence() {
        let charset: Vec<String> = ["A"].iter().map(|s| s.to_string()).collect();
        let classes = charset.len() + 1;
        let data = one_hot(&[0, 0, 0], classes);

        let (text, confidence) = decode_ctc(&data, &[1, 3, classes], &charset).unwrap();
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn ctc_handles_class_major_layout() {
        let charset: Vec<String> = ["X"].iter().map(|s| s.to_string()).collect();
        let classes = charset.len() + 1; // 2
        // Three steps in class-major [classes, steps] layout:
        // blank, X, blank.
        let data = vec![
            10.0, 0.0, 10.0, // class 0 over steps
            0.0, 10.0, 0.0, // class 1 over steps
        ];

        let (text, _) = decode_ctc(&data, &[1, classes, 3], &charset).unwrap();
        assert_eq!(text, "X");
    }

    #[test]
    fn ctc_rejects_mismatched_shapes() {
        let charset: Vec<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let data = vec![0.0; 12];
        assert!(decode_ctc(&data, &[1, 2, 6], &charset).is_err());
    }
}
