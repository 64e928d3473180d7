//! Pulls the per-tick spectrum out of the analysis effect.

use crate::audio::Channel;
use crate::config::SPECTRUM_SIZE;
use crate::error::Result;
use crate::fft::FftEffect;

/// Left/right magnitudes of one analysis window.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    pub left: [f32; SPECTRUM_SIZE],
    pub right: [f32; SPECTRUM_SIZE],
    /// Not used for drawing.
    pub dominant_frequency: f32,
}

impl SpectrumFrame {
    pub fn averaged(&self) -> AveragedSpectrum {
        AveragedSpectrum::from_channels(&self.left, &self.right)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AveragedSpectrum([f32; SPECTRUM_SIZE]);

impl AveragedSpectrum {
    pub fn zeroed() -> Self {
        Self([0.0; SPECTRUM_SIZE])
    }

    pub fn from_bins(bins: [f32; SPECTRUM_SIZE]) -> Self {
        Self(bins)
    }

    pub fn from_channels(left: &[f32; SPECTRUM_SIZE], right: &[f32; SPECTRUM_SIZE]) -> Self {
        let mut avg = [0.0; SPECTRUM_SIZE];
        for ((a, l), r) in avg.iter_mut().zip(left).zip(right) {
            *a = (l + r) / 2.0;
        }
        Self(avg)
    }

    pub fn bins(&self) -> &[f32; SPECTRUM_SIZE] {
        &self.0
    }
}

impl Default for AveragedSpectrum {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Reads one [`SpectrumFrame`] per call.
///
/// Returns `Ok(None)` when there is nothing to show: either handle missing,
/// the channel no longer playing, or the effect without two full channels of
/// data yet.
pub fn sample(channel: Option<&Channel>, effect: Option<&FftEffect>) -> Result<Option<SpectrumFrame>> {
    let (Some(channel), Some(effect)) = (channel, effect) else {
        return Ok(None);
    };
    if !channel.is_playing()? {
        return Ok(None);
    }

    let dominant_frequency = effect.dominant_frequency()?;
    let Some(spectrum) = effect.spectrum()? else {
        return Ok(None);
    };
    let (Some(left), Some(right)) = (spectrum.channel(0), spectrum.channel(1)) else {
        return Ok(None);
    };

    let mut frame = SpectrumFrame {
        left: [0.0; SPECTRUM_SIZE],
        right: [0.0; SPECTRUM_SIZE],
        dominant_frequency,
    };
    let n = left.len().min(SPECTRUM_SIZE);
    frame.left[..n].copy_from_slice(&left[..n]);
    let n = right.len().min(SPECTRUM_SIZE);
    frame.right[..n].copy_from_slice(&right[..n]);
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smallvec::smallvec;

    use super::*;
    use crate::audio::{AudioSystem, Sound};
    use crate::fft::WindowType;

    fn playing_with_effect(sound: Sound, window: usize) -> (AudioSystem, Channel, Arc<FftEffect>) {
        let audio = AudioSystem::detached(2, 48_000, 2);
        let channel = audio.play_sound(&sound, false).unwrap();
        let effect = Arc::new(FftEffect::new(window, WindowType::Rect).unwrap());
        channel.add_effect(effect.clone()).unwrap();
        let mut out = vec![0.0; window * 2];
        audio.render(&mut out);
        (audio, channel, effect)
    }

    #[test]
    fn averages_left_and_right() {
        let frame = SpectrumFrame {
            left: [2.0; SPECTRUM_SIZE],
            right: [4.0; SPECTRUM_SIZE],
            dominant_frequency: 0.0,
        };
        assert!(frame.averaged().bins().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn unset_handles_mean_no_data() {
        assert!(sample(None, None).unwrap().is_none());
        let effect = FftEffect::new(2048, WindowType::Rect).unwrap();
        assert!(sample(None, Some(&effect)).unwrap().is_none());

        let audio = AudioSystem::detached(1, 48_000, 2);
        let sound = Sound::from_samples(smallvec![vec![0.0; 16], vec![0.0; 16]], 48_000).unwrap();
        let channel = audio.play_sound(&sound, false).unwrap();
        assert!(sample(Some(&channel), None).unwrap().is_none());
    }

    #[test]
    fn stopped_channel_means_no_data() {
        let sound =
            Sound::from_samples(smallvec![vec![0.5; 8192], vec![0.5; 8192]], 48_000).unwrap();
        let (_audio, channel, effect) = playing_with_effect(sound, 2048);
        assert!(sample(Some(&channel), Some(&effect)).unwrap().is_some());
        channel.stop().unwrap();
        assert!(sample(Some(&channel), Some(&effect)).unwrap().is_none());
    }

    #[test]
    fn mono_data_is_treated_as_missing() {
        let sound = Sound::from_samples(smallvec![vec![0.5; 8192]], 48_000).unwrap();
        let (_audio, channel, effect) = playing_with_effect(sound, 2048);
        assert!(effect.spectrum().unwrap().is_some());
        assert!(sample(Some(&channel), Some(&effect)).unwrap().is_none());
    }

    #[test]
    fn short_spectrum_fills_prefix() {
        let sound =
            Sound::from_samples(smallvec![vec![0.5; 8192], vec![0.25; 8192]], 48_000).unwrap();
        let (_audio, channel, effect) = playing_with_effect(sound, 256);
        let frame = sample(Some(&channel), Some(&effect)).unwrap().unwrap();
        assert!((frame.left[0] - 1.0).abs() < 1e-4);
        assert!((frame.right[0] - 0.5).abs() < 1e-4);
        assert!(frame.left[128..].iter().all(|&v| v == 0.0));
        assert!((frame.averaged().bins()[0] - 0.75).abs() < 1e-4);
    }
}
