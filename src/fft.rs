//! FFT analysis effect.
//!
//! An [`FftEffect`] is attached to a playing [`crate::audio::Channel`]; the
//! mixer feeds it every frame the channel plays and the visualization reads
//! back per-channel magnitudes and the dominant frequency of the latest
//! window.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};

use rustfft::algorithm::Radix4;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::{Fft, FftDirection};
use smallvec::SmallVec;

use crate::config::validate_window_size;
use crate::error::{Result, SpectralError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Rect,
    Triangle,
    Hamming,
    Hanning,
    Blackman,
    BlackmanHarris,
}

impl WindowType {
    /// Weight applied to sample `index` of a window of `size` samples.
    pub fn coefficient(&self, index: usize, size: usize) -> f32 {
        if size < 2 {
            return 1.0;
        }
        let phase = 2.0 * PI * index as f32 / (size - 1) as f32;
        match self {
            WindowType::Rect => 1.0,
            WindowType::Triangle => 1.0 - (2.0 * index as f32 / (size - 1) as f32 - 1.0).abs(),
            WindowType::Hamming => 0.54 - 0.46 * phase.cos(),
            WindowType::Hanning => 0.5 * (1.0 - phase.cos()),
            WindowType::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
            WindowType::BlackmanHarris => {
                0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
                    - 0.01168 * (3.0 * phase).cos()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftParameter {
    WindowSize(usize),
    WindowType(WindowType),
}

/// Output of one analysis window.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Normalized magnitudes, `window_size / 2` bins per source channel.
    pub channels: SmallVec<[Vec<f32>; 2]>,
    pub dominant_frequency: f32,
}

impl Spectrum {
    pub fn length(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}

struct FftState {
    window_size: usize,
    window_type: WindowType,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    history: SmallVec<[VecDeque<f32>; 2]>,
    sample_rate: u32,
    buffer: Vec<Complex<f32>>,
    dirty: bool,
    cached: Option<Spectrum>,
}

impl FftState {
    fn new(window_size: usize, window_type: WindowType) -> Self {
        Self {
            window_size,
            window_type,
            fft: Arc::new(Radix4::new(window_size, FftDirection::Forward)),
            window: build_window(window_type, window_size),
            history: SmallVec::new(),
            sample_rate: 0,
            buffer: vec![Complex::zero(); window_size],
            dirty: false,
            cached: None,
        }
    }

    fn analyze(&mut self) -> Result<Option<Spectrum>> {
        if !self.dirty {
            return Ok(self.cached.clone());
        }
        self.dirty = false;
        self.cached = None;

        let size = self.window_size;
        if self.history.is_empty() || self.history.iter().any(|h| h.len() < size) {
            return Ok(None);
        }

        let scale = 2.0 / size as f32;
        let mut channels: SmallVec<[Vec<f32>; 2]> = SmallVec::new();
        for history in self.history.iter() {
            for ((input, sample), weight) in self
                .buffer
                .iter_mut()
                .zip(history.iter())
                .zip(self.window.iter())
            {
                *input = Complex::new(sample * weight, 0.0);
            }
            self.fft.process(&mut self.buffer);
            let magnitude: Vec<f32> = self.buffer[..size / 2]
                .iter()
                .map(|c| c.norm() * scale)
                .collect();
            if magnitude.iter().any(|m| !m.is_finite()) {
                return Err(SpectralError::Analysis(
                    "fft produced non-finite magnitudes".to_string(),
                ));
            }
            channels.push(magnitude);
        }

        let bins = size / 2;
        let peak = (0..bins)
            .map(|k| channels.iter().map(|c| c[k]).sum::<f32>())
            .enumerate()
            .fold((0, f32::MIN), |best, (k, m)| if m > best.1 { (k, m) } else { best })
            .0;
        let dominant_frequency = peak as f32 * self.sample_rate as f32 / size as f32;

        let spectrum = Spectrum {
            channels,
            dominant_frequency,
        };
        self.cached = Some(spectrum.clone());
        Ok(Some(spectrum))
    }
}

fn build_window(window_type: WindowType, size: usize) -> Vec<f32> {
    (0..size).map(|i| window_type.coefficient(i, size)).collect()
}

pub struct FftEffect {
    state: Mutex<FftState>,
}

impl FftEffect {
    pub fn new(window_size: usize, window_type: WindowType) -> Result<Self> {
        validate_window_size(window_size)?;
        Ok(Self {
            state: Mutex::new(FftState::new(window_size, window_type)),
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, FftState>> {
        self.state
            .lock()
            .map_err(|_| SpectralError::Poisoned("fft effect"))
    }

    pub fn set_parameter(&self, parameter: FftParameter) -> Result<()> {
        let mut state = self.state()?;
        match parameter {
            FftParameter::WindowSize(size) => {
                validate_window_size(size)?;
                let history = std::mem::take(&mut state.history);
                let sample_rate = state.sample_rate;
                let window_type = state.window_type;
                *state = FftState::new(size, window_type);
                state.sample_rate = sample_rate;
                state.history = history;
                for h in state.history.iter_mut() {
                    while h.len() > size {
                        h.pop_front();
                    }
                }
            }
            FftParameter::WindowType(window_type) => {
                state.window_type = window_type;
                state.window = build_window(window_type, state.window_size);
            }
        }
        state.dirty = true;
        log::debug!("fft effect parameter set: {:?}", parameter);
        Ok(())
    }

    pub fn window_size(&self) -> Result<usize> {
        Ok(self.state()?.window_size)
    }

    pub fn window_type(&self) -> Result<WindowType> {
        Ok(self.state()?.window_type)
    }

    /// Feeds interleaved frames of `channels` samples each.
    pub fn process(&self, frames: &[f32], channels: usize, sample_rate: u32) {
        if channels == 0 {
            return;
        }
        // poisoned: readers report it, the mixer just stops feeding
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.history.len() != channels {
            state.history = (0..channels).map(|_| VecDeque::new()).collect();
        }
        state.sample_rate = sample_rate;
        let size = state.window_size;
        for frame in frames.chunks_exact(channels) {
            for (history, &sample) in state.history.iter_mut().zip(frame) {
                if history.len() == size {
                    history.pop_front();
                }
                history.push_back(sample);
            }
        }
        state.dirty = true;
    }

    /// Frequency in Hz of the strongest bin, 0 when no window is available.
    pub fn dominant_frequency(&self) -> Result<f32> {
        Ok(self
            .state()?
            .analyze()?
            .map_or(0.0, |s| s.dominant_frequency))
    }

    /// Magnitudes of the latest full window, `None` until one is available.
    pub fn spectrum(&self) -> Result<Option<Spectrum>> {
        self.state()?.analyze()
    }

    pub fn reset(&self) -> Result<()> {
        let mut state = self.state()?;
        state.history.clear();
        state.cached = None;
        state.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, frames: usize, channels: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * channels);
        for n in 0..frames {
            let s = amplitude * (2.0 * PI * freq * n as f32 / sample_rate as f32).sin();
            out.extend(std::iter::repeat(s).take(channels));
        }
        out
    }

    #[test]
    fn finds_bin_centered_tone() {
        let effect = FftEffect::new(2048, WindowType::Rect).unwrap();
        // bin 64 of a 2048 window at 48 kHz
        effect.process(&sine(1500.0, 0.5, 48_000, 4096, 2), 2, 48_000);

        let spectrum = effect.spectrum().unwrap().expect("full window");
        assert_eq!(spectrum.channels.len(), 2);
        assert_eq!(spectrum.length(), 1024);
        assert_abs_diff_eq!(spectrum.channel(0).unwrap()[64], 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(spectrum.channel(1).unwrap()[64], 0.5, epsilon = 1e-3);
        assert!(spectrum.channel(0).unwrap()[200] < 1e-3);
        assert_abs_diff_eq!(effect.dominant_frequency().unwrap(), 1500.0, epsilon = 0.5);
    }

    #[test]
    fn no_data_until_window_is_full() {
        let effect = FftEffect::new(2048, WindowType::Rect).unwrap();
        assert!(effect.spectrum().unwrap().is_none());
        assert_eq!(effect.dominant_frequency().unwrap(), 0.0);
        effect.process(&sine(440.0, 0.5, 44_100, 2047, 2), 2, 44_100);
        assert!(effect.spectrum().unwrap().is_none());
        effect.process(&[0.0, 0.0], 2, 44_100);
        assert!(effect.spectrum().unwrap().is_some());
    }

    #[test]
    fn mono_source_yields_one_channel() {
        let effect = FftEffect::new(256, WindowType::Hanning).unwrap();
        effect.process(&sine(1000.0, 1.0, 8_000, 512, 1), 1, 8_000);
        let spectrum = effect.spectrum().unwrap().unwrap();
        assert_eq!(spectrum.channels.len(), 1);
        assert!(spectrum.channel(1).is_none());
    }

    #[test]
    fn rejects_invalid_window_size() {
        assert!(FftEffect::new(1000, WindowType::Rect).is_err());
        let effect = FftEffect::new(2048, WindowType::Rect).unwrap();
        assert!(effect
            .set_parameter(FftParameter::WindowSize(3000))
            .is_err());
        assert_eq!(effect.window_size().unwrap(), 2048);
    }

    #[test]
    fn shrinking_the_window_keeps_recent_samples() {
        let effect = FftEffect::new(2048, WindowType::Rect).unwrap();
        effect.process(&sine(1000.0, 0.5, 48_000, 2048, 2), 2, 48_000);
        effect
            .set_parameter(FftParameter::WindowSize(1024))
            .unwrap();
        let spectrum = effect.spectrum().unwrap().unwrap();
        assert_eq!(spectrum.length(), 512);
    }

    #[test]
    fn window_shapes() {
        let size = 1025;
        assert_eq!(WindowType::Rect.coefficient(0, size), 1.0);
        assert_abs_diff_eq!(WindowType::Hanning.coefficient(0, size), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(WindowType::Hanning.coefficient(512, size), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(WindowType::Hamming.coefficient(0, size), 0.08, epsilon = 1e-6);
        assert_abs_diff_eq!(WindowType::Triangle.coefficient(512, size), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(WindowType::Blackman.coefficient(512, size), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(
            WindowType::BlackmanHarris.coefficient(0, size),
            0.00006,
            epsilon = 1e-5
        );
    }

    #[test]
    fn reset_discards_history() {
        let effect = FftEffect::new(128, WindowType::Rect).unwrap();
        effect.process(&sine(1000.0, 0.5, 8_000, 256, 2), 2, 8_000);
        assert!(effect.spectrum().unwrap().is_some());
        effect.reset().unwrap();
        assert!(effect.spectrum().unwrap().is_none());
    }
}
