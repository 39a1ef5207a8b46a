//! Data Augmentation Module
//!
//! Training images go through a random resized crop, horizontal and
//! vertical flips, a random rotation and a color jitter. Evaluation images
//! are only resized. Both return CHW `f32` data in [0, 1]; ImageNet
//! normalization happens in the batcher.

use image::imageops::FilterType;
use image::{imageops, ImageBuffer, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for training-time augmentation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AugmentationConfig {
    /// Lower bound of the crop area, as a fraction of the source area
    pub crop_scale_min: f32,
    /// Upper bound of the crop area
    pub crop_scale_max: f32,
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f32,
    /// Probability of a vertical flip
    pub vertical_flip_prob: f32,
    /// Maximum rotation angle in degrees (applied as ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Brightness factor drawn from [1 - b, 1 + b]
    pub brightness: f32,
    /// Contrast factor drawn from [1 - c, 1 + c]
    pub contrast: f32,
    /// Saturation factor drawn from [1 - s, 1 + s]
    pub saturation: f32,
    /// Hue shift drawn from [-h, h], in fractions of a full turn
    pub hue: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            crop_scale_min: 0.8,
            crop_scale_max: 1.0,
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            rotation_degrees: 20.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
            hue: 0.05,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            crop_scale_min: 1.0,
            crop_scale_max: 1.0,
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            rotation_degrees: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
            hue: 0.0,
        }
    }

    /// Check ranges
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0 < self.crop_scale_min && self.crop_scale_min <= self.crop_scale_max && self.crop_scale_max <= 1.0) {
            return Err("crop scale must satisfy 0 < min <= max <= 1".to_string());
        }
        for (name, p) in [
            ("horizontal_flip_prob", self.horizontal_flip_prob),
            ("vertical_flip_prob", self.vertical_flip_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{} must be in [0, 1]", name));
            }
        }
        if self.hue < 0.0 || self.hue > 0.5 {
            return Err("hue must be in [0, 0.5]".to_string());
        }
        if self.brightness < 0.0 || self.contrast < 0.0 || self.saturation < 0.0 || self.rotation_degrees < 0.0 {
            return Err("jitter and rotation ranges must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Image augmenter producing fixed-size tensors
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    /// Augmenter that only resizes
    pub fn no_augmentation(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size)
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Training transform: crop, flips, rotation, color jitter
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut result = self.random_resized_crop(img, rng);

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            result = imageops::flip_horizontal(&result);
        }
        if rng.gen::<f32>() < self.config.vertical_flip_prob {
            result = imageops::flip_vertical(&result);
        }

        if self.config.rotation_degrees > 0.0 {
            let angle = rng.gen_range(-self.config.rotation_degrees..=self.config.rotation_degrees);
            result = rotate(&result, angle);
        }

        self.color_jitter(result, rng)
    }

    /// Evaluation transform: plain resize to the target size
    pub fn resize(&self, img: &RgbImage) -> RgbImage {
        imageops::resize(img, self.image_size, self.image_size, FilterType::Triangle)
    }

    /// Train or eval preprocessing straight to CHW data
    pub fn preprocess(&self, img: &RgbImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let out = match rng {
            Some(rng) => self.augment(img, rng),
            None => self.resize(img),
        };
        to_chw(&out)
    }

    /// Crop a random region covering `scale` of the area with aspect ratio
    /// in [3/4, 4/3], then resize; falls back to the whole image after ten tries
    fn random_resized_crop(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let (width, height) = img.dimensions();
        let area = (width * height) as f32;
        let (log_lo, log_hi) = ((3.0f32 / 4.0).ln(), (4.0f32 / 3.0).ln());

        for _ in 0..10 {
            let target_area = area * rng.gen_range(self.config.crop_scale_min..=self.config.crop_scale_max);
            let aspect = rng.gen_range(log_lo..=log_hi).exp();

            let cw = (target_area * aspect).sqrt().round() as u32;
            let ch = (target_area / aspect).sqrt().round() as u32;

            if cw > 0 && ch > 0 && cw <= width && ch <= height {
                let x = rng.gen_range(0..=width - cw);
                let y = rng.gen_range(0..=height - ch);
                let crop = imageops::crop_imm(img, x, y, cw, ch).to_image();
                return self.resize(&crop);
            }
        }

        self.resize(img)
    }

    /// Brightness, contrast, saturation and hue in random order
    fn color_jitter(&self, mut img: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut order = [0u8, 1, 2, 3];
        order.shuffle(rng);

        for op in order {
            img = match op {
                0 if self.config.brightness > 0.0 => {
                    let f = 1.0 + rng.gen_range(-self.config.brightness..=self.config.brightness);
                    adjust_brightness(&img, f)
                }
                1 if self.config.contrast > 0.0 => {
                    let f = 1.0 + rng.gen_range(-self.config.contrast..=self.config.contrast);
                    adjust_contrast(&img, f)
                }
                2 if self.config.saturation > 0.0 => {
                    let f = 1.0 + rng.gen_range(-self.config.saturation..=self.config.saturation);
                    adjust_saturation(&img, f)
                }
                3 if self.config.hue > 0.0 => {
                    let shift = rng.gen_range(-self.config.hue..=self.config.hue);
                    adjust_hue(&img, shift)
                }
                _ => img,
            };
        }

        img
    }
}

/// Convert an RGB image to CHW float data in [0, 1]
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in img.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    data
}

/// Rotate around the center; pixels mapped from outside the source are black
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 0.1 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;
        bilinear_sample(img, src_x, src_y)
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn luminance(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// Blend every channel towards `anchor` by `factor` (1.0 = identity)
fn blend(value: u8, anchor: f32, factor: f32) -> u8 {
    (anchor + factor * (value as f32 - anchor)).round().clamp(0.0, 255.0) as u8
}

fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([blend(p[0], 0.0, factor), blend(p[1], 0.0, factor), blend(p[2], 0.0, factor)])
    })
}

fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() * img.height()).max(1) as f32;
    let mean = img.pixels().map(luminance).sum::<f32>() / count;

    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([blend(p[0], mean, factor), blend(p[1], mean, factor), blend(p[2], mean, factor)])
    })
}

fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let gray = luminance(p);
        Rgb([blend(p[0], gray, factor), blend(p[1], gray, factor), blend(p[2], gray, factor)])
    })
}

fn adjust_hue(img: &RgbImage, shift: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let (h, s, v) = rgb_to_hsv(img.get_pixel(x, y));
        hsv_to_rgb((h + shift).rem_euclid(1.0), s, v)
    })
}

/// RGB to HSV with every component in [0, 1]
fn rgb_to_hsv(p: &Rgb<u8>) -> (f32, f32, f32) {
    let r = p[0] as f32 / 255.0;
    let g = p[1] as f32 / 255.0;
    let b = p[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };

    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let sector = h * 6.0;
    let c = v * s;
    let x = c * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| Rgb([(x * 3 % 256) as u8, (y * 3 % 256) as u8, 128]))
    }

    #[test]
    fn test_default_matches_training_recipe() {
        let config = AugmentationConfig::default();
        assert_eq!(config.crop_scale_min, 0.8);
        assert_eq!(config.rotation_degrees, 20.0);
        assert_eq!(config.hue, 0.05);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AugmentationConfig {
            crop_scale_min: 0.9,
            crop_scale_max: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_augment_output_size() {
        let aug = Augmenter::new(AugmentationConfig::default(), 32);
        let img = create_test_image(80, 60);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..5 {
            let out = aug.augment(&img, &mut rng);
            assert_eq!(out.dimensions(), (32, 32));
        }
    }

    #[test]
    fn test_augment_is_seeded() {
        let aug = Augmenter::new(AugmentationConfig::default(), 24);
        let img = create_test_image(40, 40);

        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(7));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_preprocess_eval_is_chw_unit_range() {
        let aug = Augmenter::no_augmentation(16);
        let data = aug.preprocess(&create_test_image(50, 50), None);

        assert_eq!(data.len(), 3 * 16 * 16);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
        // Blue plane is constant 128
        assert!(data[2 * 256..].iter().all(|v| (*v - 128.0 / 255.0).abs() < 0.01));
    }

    #[test]
    fn test_rotation_keeps_center() {
        let img = create_test_image(21, 21);
        let rotated = rotate(&img, 15.0);
        assert_eq!(rotated.get_pixel(10, 10), img.get_pixel(10, 10));
    }

    #[test]
    fn test_hsv_round_trip_on_primaries() {
        for rgb in [[255u8, 0, 0], [0, 255, 0], [0, 0, 255], [200, 120, 40]] {
            let (h, s, v) = rgb_to_hsv(&Rgb(rgb));
            let back = hsv_to_rgb(h, s, v);
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_brightness_scales_pixels() {
        let img = ImageBuffer::from_pixel(4, 4, Rgb([100u8, 100, 100]));
        let brighter = adjust_brightness(&img, 1.2);
        assert_eq!(brighter.get_pixel(0, 0)[0], 120);
    }
}
