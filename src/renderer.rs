//! Bar renderer: magnitude per bin to column height, painted as a fixed
//! red-to-blue vertical gradient.

use crate::config::SPECTRUM_SIZE;
use crate::error::Result;
use crate::pixel::{FrameBuffer, Surface};
use crate::sampler::AveragedSpectrum;

/// Compresses the magnitude range so quiet bins still show.
pub const PERCEPTUAL_EXPONENT: f64 = 0.15;

pub type BarHeights = [i32; SPECTRUM_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightPolicy {
    /// Heights limited to `0..=area_height - 1`.
    Clamped,
    /// Raw curve; magnitudes above 1.0 give negative heights.
    Unclamped,
}

#[derive(Debug, Clone)]
pub struct BarRenderer {
    area_height: u32,
    policy: HeightPolicy,
}

impl Default for BarRenderer {
    fn default() -> Self {
        Self::new(512, HeightPolicy::Clamped)
    }
}

impl BarRenderer {
    pub fn new(area_height: u32, policy: HeightPolicy) -> Self {
        Self {
            area_height: area_height.max(1),
            policy,
        }
    }

    pub fn area_height(&self) -> u32 {
        self.area_height
    }

    pub fn policy(&self) -> HeightPolicy {
        self.policy
    }

    /// Top row of the bar for one bin; rows below it get painted.
    pub fn bar_height(&self, magnitude: f32) -> i32 {
        let h = self.area_height as f64;
        // NaN and negatives would poison powf
        let magnitude = if magnitude > 0.0 { magnitude as f64 } else { 0.0 };
        let raw = (h - 1.0) - (h * magnitude.powf(PERCEPTUAL_EXPONENT)).floor();
        let raw = raw.max(i32::MIN as f64) as i32;
        match self.policy {
            HeightPolicy::Clamped => raw.clamp(0, self.area_height as i32 - 1),
            HeightPolicy::Unclamped => raw,
        }
    }

    pub fn bar_heights(&self, spectrum: &AveragedSpectrum) -> BarHeights {
        let mut heights = [0; SPECTRUM_SIZE];
        for (height, &magnitude) in heights.iter_mut().zip(spectrum.bins()) {
            *height = self.bar_height(magnitude);
        }
        heights
    }

    /// Gradient color of row `row`: red at the top fading to blue at the bottom.
    pub fn bar_color(&self, row: u32) -> [u8; 3] {
        let shade = (row as u64 * 255 / self.area_height as u64).min(255) as u8;
        [255 - shade, 0, shade]
    }

    /// Clears `fb` to black and paints one bar per column.
    pub fn paint(&self, fb: &mut FrameBuffer, heights: &BarHeights) {
        let black = fb.map_rgb(0, 0, 0);
        fb.fill(black);

        let bottom = self.area_height as i32 - 1;
        let columns = (fb.width() as usize).min(SPECTRUM_SIZE);
        for (x, &height) in heights.iter().enumerate().take(columns) {
            // rows above the buffer top are never drawn
            let stop = height.max(-1);
            let mut row = bottom;
            while row > stop {
                let [r, g, b] = self.bar_color(row as u32);
                let pixel = fb.map_rgb(r, g, b);
                fb.set_pixel(x as u32, row as u32, pixel);
                row -= 1;
            }
        }
    }

    /// Computes heights and paints them under the surface lock.
    pub fn render(&self, surface: &Surface, spectrum: &AveragedSpectrum) -> Result<BarHeights> {
        let heights = self.bar_heights(spectrum);
        let mut fb = surface.lock()?;
        self.paint(&mut fb, &heights);
        Ok(heights)
    }
}
