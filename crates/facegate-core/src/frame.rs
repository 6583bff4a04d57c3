//! Pixel containers and grayscale image statistics used by the liveness
//! heuristics.

/// Decoded 3-channel image. Channel order is always RGB.
pub type PixelArray = image::RgbImage;

/// ITU-R BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// A single-channel grayscale frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Sharpness/contrast measurements used by the static liveness heuristic.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FrameStatistics {
    /// Variance of the 3×3 Laplacian response.
    pub sharpness: f64,
    /// Population standard deviation of intensity.
    pub contrast: f64,
    /// Mean intensity (0.0–255.0).
    pub brightness: f64,
}

impl GrayFrame {
    /// Convert an RGB image to grayscale with BT.601 weights.
    pub fn from_rgb(image: &PixelArray) -> Self {
        let data = image
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                let y = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        Self {
            data,
            width: image.width(),
            height: image.height(),
        }
    }

    /// Intensity at (x, y). Callers keep coordinates in bounds.
    fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width as usize + x] as f64
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Population standard deviation of pixel intensity.
    pub fn std_dev(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.avg_brightness();
        let n = self.data.len() as f64;
        let variance = self
            .data
            .iter()
            .map(|&b| (b as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    /// Variance of the Laplacian edge response.
    ///
    /// Uses the 4-neighbour kernel `[0 1 0; 1 -4 1; 0 1 0]` with reflect-101
    /// border handling. Blurry captures and re-photographed screens score low.
    pub fn laplacian_variance(&self) -> f64 {
        let w = self.width as usize;
        let h = self.height as usize;
        if w == 0 || h == 0 || self.data.len() < w * h {
            return 0.0;
        }

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in 0..h {
            let up = reflect_101(y as isize - 1, h);
            let down = reflect_101(y as isize + 1, h);
            for x in 0..w {
                let left = reflect_101(x as isize - 1, w);
                let right = reflect_101(x as isize + 1, w);
                let response = self.at(x, up) + self.at(x, down) + self.at(left, y)
                    + self.at(right, y)
                    - 4.0 * self.at(x, y);
                sum += response;
                sum_sq += response * response;
            }
        }

        let n = (w * h) as f64;
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0)
    }

    pub fn statistics(&self) -> FrameStatistics {
        FrameStatistics {
            sharpness: self.laplacian_variance(),
            contrast: self.std_dev(),
            brightness: self.avg_brightness(),
        }
    }
}

/// Mirror an out-of-range index without repeating the edge pixel
/// (`-1 → 1`, `n → n - 2`).
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= n {
        i = 2 * (n - 1) - i;
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gray(data: Vec<u8>, width: u32, height: u32) -> GrayFrame {
        GrayFrame { data, width, height }
    }

    #[test]
    fn test_from_rgb_luma_weights() {
        let mut img = PixelArray::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        let g = GrayFrame::from_rgb(&img);
        assert_eq!(g.width, 3);
        assert_eq!(g.height, 1);
        assert_eq!(g.data, vec![76, 150, 29]);
    }

    #[test]
    fn test_from_rgb_gray_is_identity() {
        let img = PixelArray::from_pixel(4, 4, Rgb([120, 120, 120]));
        let g = GrayFrame::from_rgb(&img);
        assert!(g.data.iter().all(|&p| p == 120));
    }

    #[test]
    fn test_std_dev_uniform_is_zero() {
        let g = gray(vec![128; 100], 10, 10);
        assert_eq!(g.std_dev(), 0.0);
        assert!((g.avg_brightness() - 128.0).abs() < 1e-9);
    }

    #[test]
    fn test_std_dev_half_black_half_white() {
        let mut data = vec![0u8; 50];
        data.extend(vec![255u8; 50]);
        let g = gray(data, 10, 10);
        assert!((g.std_dev() - 127.5).abs() < 1e-9);
    }

    #[test]
    fn test_std_dev_empty() {
        let g = gray(vec![], 0, 0);
        assert_eq!(g.std_dev(), 0.0);
        assert_eq!(g.avg_brightness(), 0.0);
    }

    #[test]
    fn test_laplacian_uniform_is_zero() {
        let g = gray(vec![200; 64], 8, 8);
        assert_eq!(g.laplacian_variance(), 0.0);
    }

    #[test]
    fn test_laplacian_linear_ramp_is_flat_inside() {
        // A horizontal ramp has zero second derivative away from the borders;
        // reflect-101 keeps the borders at zero too.
        let w = 8u32;
        let data: Vec<u8> = (0..8 * 8).map(|i| ((i % 8) * 10) as u8).collect();
        let g = gray(data, w, 8);
        // Border columns reflect to a +/-20 response; interior is exactly zero.
        assert!(g.laplacian_variance() > 0.0);
        let interior_zero = (1..7).all(|x| {
            let left = g.at(x - 1, 3);
            let right = g.at(x + 1, 3);
            left + right - 2.0 * g.at(x, 3) == 0.0
        });
        assert!(interior_zero);
    }

    #[test]
    fn test_laplacian_checkerboard_is_sharp() {
        let data: Vec<u8> = (0..16 * 16)
            .map(|i| if ((i % 16) + (i / 16)) % 2 == 0 { 0 } else { 255 })
            .collect();
        let g = gray(data, 16, 16);
        // Every pixel responds with +/-1020.
        assert!((g.laplacian_variance() - 1020.0f64.powi(2)).abs() < 1e-6);
    }

    #[test]
    fn test_laplacian_single_pixel() {
        let g = gray(vec![77], 1, 1);
        assert_eq!(g.laplacian_variance(), 0.0);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(0, 5), 0);
        assert_eq!(reflect_101(4, 5), 4);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(-1, 1), 0);
    }

    #[test]
    fn test_statistics_bundle() {
        let g = gray(vec![10; 9], 3, 3);
        let stats = g.statistics();
        assert_eq!(stats.sharpness, 0.0);
        assert_eq!(stats.contrast, 0.0);
        assert!((stats.brightness - 10.0).abs() < 1e-9);
    }
}
