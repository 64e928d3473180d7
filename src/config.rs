//! Application configuration and constants.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SpectralError};
use crate::fft::WindowType;
use crate::renderer::HeightPolicy;

/// Number of frequency bins shown, one per pixel column.
pub const SPECTRUM_SIZE: usize = 1024;

/// Smallest and largest FFT window accepted by the analysis effect.
pub const MIN_WINDOW_SIZE: usize = 128;
pub const MAX_WINDOW_SIZE: usize = 16384;

#[derive(Debug, Clone)]
pub struct Config {
    pub title: String,
    pub width: u32,
    pub height: u32,

    pub audio_path: PathBuf,
    pub icon_path: PathBuf,
    pub font_path: PathBuf,
    pub font_size: f32,

    /// Text drawn over the spectrum, and its top-left corner in pixels.
    pub caption: String,
    pub caption_position: (f32, f32),

    /// Period of the visualization tick.
    pub tick_period: Duration,

    /// FFT window size; the effect yields `fft_window_size / 2` bins.
    pub fft_window_size: usize,
    pub fft_window_type: WindowType,

    /// Channels the audio system can play at once.
    pub max_channels: usize,

    pub height_policy: HeightPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "FMOD: Spectral Analysis".to_string(),
            width: SPECTRUM_SIZE as u32,
            height: 512,
            audio_path: PathBuf::from("Guitar.wav"),
            icon_path: PathBuf::from("sdl_icone.bmp"),
            font_path: PathBuf::from("angelina.ttf"),
            font_size: 65.0,
            caption: "Guitar".to_string(),
            caption_position: (750.0, 25.0),
            tick_period: Duration::from_millis(5),
            fft_window_size: 2 * SPECTRUM_SIZE,
            fft_window_type: WindowType::Rect,
            max_channels: 2,
            height_policy: HeightPolicy::Clamped,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SpectralError::InvalidConfig(format!(
                "window size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.tick_period.is_zero() {
            return Err(SpectralError::InvalidConfig(
                "tick period must be non-zero".to_string(),
            ));
        }
        if self.max_channels == 0 {
            return Err(SpectralError::InvalidConfig(
                "at least one channel is required".to_string(),
            ));
        }
        validate_window_size(self.fft_window_size)
    }
}

pub(crate) fn validate_window_size(size: usize) -> Result<()> {
    if !size.is_power_of_two() || !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&size) {
        return Err(SpectralError::InvalidParameter(format!(
            "fft window size {} must be a power of two in {}..={}",
            size, MIN_WINDOW_SIZE, MAX_WINDOW_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_window() {
        let config = Config::default();
        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 512);
        assert_eq!(config.fft_window_size / 2, SPECTRUM_SIZE);
        assert_eq!(config.tick_period, Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_window_sizes() {
        for size in [0, 100, 2000, 64, 32768] {
            let config = Config {
                fft_window_size: size,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "size {} accepted", size);
        }
    }

    #[test]
    fn rejects_zero_period() {
        let config = Config {
            tick_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
