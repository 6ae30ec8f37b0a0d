//! Random affine augmentation
//!
//! Rotation, shift, shear and zoom are composed into a single affine map
//! about the image centre and resampled with bilinear interpolation. Pixels
//! that fall outside the source take the value of the nearest edge pixel.
//! The optional horizontal flip is applied after the affine map.
//!
//! Images are CHW `f32` buffers holding raw 0..=255 values; rescaling to
//! [0, 1] happens after augmentation.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::AugmentationParams;

/// Concrete transform drawn for one image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    /// Rotation in degrees
    pub theta: f64,
    /// Row shift in pixels
    pub tx: f64,
    /// Column shift in pixels
    pub ty: f64,
    /// Shear angle in degrees
    pub shear: f64,
    /// Row zoom factor
    pub zx: f64,
    /// Column zoom factor
    pub zy: f64,
    pub flip_horizontal: bool,
}

impl TransformParams {
    pub fn identity() -> Self {
        Self {
            theta: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear: 0.0,
            zx: 1.0,
            zy: 1.0,
            flip_horizontal: false,
        }
    }

    /// 3x3 homogeneous matrix mapping output (row, col) to input (row, col),
    /// or `None` when the affine part is the identity
    fn affine_matrix(&self, height: usize, width: usize) -> Option<Mat3> {
        let mut transform: Option<Mat3> = None;
        let mut compose = |m: Mat3| {
            transform = Some(match transform {
                Some(t) => matmul(&t, &m),
                None => m,
            });
        };

        if self.theta != 0.0 {
            let theta = self.theta.to_radians();
            let (sin, cos) = theta.sin_cos();
            compose([[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]]);
        }
        if self.tx != 0.0 || self.ty != 0.0 {
            compose([[1.0, 0.0, self.tx], [0.0, 1.0, self.ty], [0.0, 0.0, 1.0]]);
        }
        if self.shear != 0.0 {
            let shear = self.shear.to_radians();
            compose([[1.0, -shear.sin(), 0.0], [0.0, shear.cos(), 0.0], [0.0, 0.0, 1.0]]);
        }
        if self.zx != 1.0 || self.zy != 1.0 {
            compose([[self.zx, 0.0, 0.0], [0.0, self.zy, 0.0], [0.0, 0.0, 1.0]]);
        }

        transform.map(|m| offset_center(&m, height, width))
    }
}

type Mat3 = [[f64; 3]; 3];

fn matmul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Move the origin of `m` to the image centre
fn offset_center(m: &Mat3, height: usize, width: usize) -> Mat3 {
    let o_r = height as f64 / 2.0 + 0.5;
    let o_c = width as f64 / 2.0 + 0.5;
    let offset = [[1.0, 0.0, o_r], [0.0, 1.0, o_c], [0.0, 0.0, 1.0]];
    let reset = [[1.0, 0.0, -o_r], [0.0, 1.0, -o_c], [0.0, 0.0, 1.0]];
    matmul(&matmul(&offset, m), &reset)
}

/// Applies random affine transforms drawn from [`AugmentationParams`]
#[derive(Debug, Clone)]
pub struct Augmenter {
    params: AugmentationParams,
}

impl Augmenter {
    pub fn new(params: AugmentationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AugmentationParams {
        &self.params
    }

    /// Draw the transform for one image of the given size
    pub fn sample_params(&self, height: usize, width: usize, rng: &mut ChaCha8Rng) -> TransformParams {
        let p = &self.params;
        let symmetric = |rng: &mut ChaCha8Rng, range: f32| -> f64 {
            if range > 0.0 {
                rng.gen_range(-(range as f64)..=range as f64)
            } else {
                0.0
            }
        };

        let theta = symmetric(rng, p.rotation_range);

        let mut tx = symmetric(rng, p.height_shift_range);
        if p.height_shift_range < 1.0 {
            tx *= height as f64;
        }
        let mut ty = symmetric(rng, p.width_shift_range);
        if p.width_shift_range < 1.0 {
            ty *= width as f64;
        }

        let shear = symmetric(rng, p.shear_range);

        let (zx, zy) = if p.zoom_range > 0.0 {
            let lo = 1.0 - p.zoom_range as f64;
            let hi = 1.0 + p.zoom_range as f64;
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        } else {
            (1.0, 1.0)
        };

        let flip_horizontal = p.horizontal_flip && rng.gen::<f64>() < 0.5;

        TransformParams {
            theta,
            tx,
            ty,
            shear,
            zx,
            zy,
            flip_horizontal,
        }
    }

    /// Draw a transform and apply it
    pub fn augment(&self, image: &[f32], height: usize, width: usize, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let transform = self.sample_params(height, width, rng);
        apply_transform(image, height, width, &transform)
    }
}

/// Apply a concrete transform to a CHW image
pub fn apply_transform(image: &[f32], height: usize, width: usize, transform: &TransformParams) -> Vec<f32> {
    let plane = height * width;
    let mut out = match transform.affine_matrix(height, width) {
        Some(m) => {
            let mut out = vec![0.0f32; image.len()];
            for (src, dst) in image.chunks_exact(plane).zip(out.chunks_exact_mut(plane)) {
                for r in 0..height {
                    for c in 0..width {
                        let (rf, cf) = (r as f64, c as f64);
                        let in_r = m[0][0] * rf + m[0][1] * cf + m[0][2];
                        let in_c = m[1][0] * rf + m[1][1] * cf + m[1][2];
                        dst[r * width + c] = bilinear_sample(src, height, width, in_r, in_c);
                    }
                }
            }
            out
        }
        None => image.to_vec(),
    };

    if transform.flip_horizontal {
        flip_horizontal(&mut out, height, width);
    }
    out
}

/// Bilinear interpolation with coordinates clamped to the image border
fn bilinear_sample(channel: &[f32], height: usize, width: usize, r: f64, c: f64) -> f32 {
    let r = r.clamp(0.0, (height - 1) as f64);
    let c = c.clamp(0.0, (width - 1) as f64);

    let r0 = r.floor() as usize;
    let c0 = c.floor() as usize;
    let r1 = (r0 + 1).min(height - 1);
    let c1 = (c0 + 1).min(width - 1);
    let fr = r - r0 as f64;
    let fc = c - c0 as f64;

    let at = |r: usize, c: usize| channel[r * width + c] as f64;
    let top = at(r0, c0) * (1.0 - fc) + at(r0, c1) * fc;
    let bottom = at(r1, c0) * (1.0 - fc) + at(r1, c1) * fc;
    (top * (1.0 - fr) + bottom * fr) as f32
}

/// Mirror every row of every channel in place
fn flip_horizontal(image: &mut [f32], height: usize, width: usize) {
    for row in image.chunks_exact_mut(width).take(3 * height) {
        row.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient_image(height: usize, width: usize) -> Vec<f32> {
        (0..3 * height * width).map(|i| (i % 251) as f32).collect()
    }

    fn full_params() -> AugmentationParams {
        AugmentationParams {
            rotation_range: 40.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }

    #[test]
    fn test_identity_transform_is_noop() {
        let img = gradient_image(6, 5);
        let out = apply_transform(&img, 6, 5, &TransformParams::identity());
        assert_eq!(out, img);
    }

    #[test]
    fn test_no_augmentation_params_draw_identity() {
        let augmenter = Augmenter::new(AugmentationParams::none());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(augmenter.sample_params(10, 10, &mut rng), TransformParams::identity());
    }

    #[test]
    fn test_horizontal_flip() {
        // one channel row per line: 0 1 2 / 3 4 5
        let img: Vec<f32> = (0..18).map(|v| v as f32).collect();
        let transform = TransformParams {
            flip_horizontal: true,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, 2, 3, &transform);
        assert_eq!(&out[..6], &[2.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
        assert_eq!(&out[12..], &[14.0, 13.0, 12.0, 17.0, 16.0, 15.0]);
    }

    #[test]
    fn test_row_shift_uses_nearest_fill() {
        // 4x1 single-column image, replicated over 3 channels
        let img: Vec<f32> = [10.0, 20.0, 30.0, 40.0].repeat(3);
        let transform = TransformParams {
            tx: 1.0,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, 4, 1, &transform);
        // output row r reads input row r + 1, the last row repeats the edge
        assert_eq!(&out[..4], &[20.0, 30.0, 40.0, 40.0]);
    }

    #[test]
    fn test_sampled_params_within_ranges() {
        let augmenter = Augmenter::new(full_params());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut flips = 0;

        for _ in 0..200 {
            let t = augmenter.sample_params(150, 100, &mut rng);
            assert!(t.theta.abs() <= 40.0);
            assert!(t.tx.abs() <= 0.2 * 150.0);
            assert!(t.ty.abs() <= 0.2 * 100.0);
            assert!(t.shear.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&t.zx));
            assert!((0.8..=1.2).contains(&t.zy));
            flips += t.flip_horizontal as usize;
        }
        assert!(flips > 50 && flips < 150);
    }

    #[test]
    fn test_pixel_shift_range_not_scaled() {
        let params = AugmentationParams {
            height_shift_range: 3.0,
            ..AugmentationParams::none()
        };
        let augmenter = Augmenter::new(params);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(augmenter.sample_params(150, 150, &mut rng).tx.abs() <= 3.0);
        }
    }

    #[test]
    fn test_augment_preserves_value_range() {
        let augmenter = Augmenter::new(full_params());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let img = gradient_image(16, 16);
        let out = augmenter.augment(&img, 16, 16, &mut rng);

        assert_eq!(out.len(), img.len());
        assert!(out.iter().all(|v| (0.0..=250.0).contains(v)));
    }

    #[test]
    fn test_same_seed_same_result() {
        let augmenter = Augmenter::new(full_params());
        let img = gradient_image(8, 8);
        let a = augmenter.augment(&img, 8, 8, &mut ChaCha8Rng::seed_from_u64(9));
        let b = augmenter.augment(&img, 8, 8, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
