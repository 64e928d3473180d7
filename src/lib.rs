//! Plays an audio file and draws its spectrum as a bar graph, one pixel
//! column per FFT bin.
//!
//! The pipeline each tick: [`sampler::sample`] reads the two-channel
//! magnitudes from the [`fft::FftEffect`] attached to the playing
//! [`audio::Channel`], [`renderer::BarRenderer`] turns them into bar heights
//! and paints the shared [`pixel::Surface`], and the window presents it.

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod pixel;
pub mod renderer;
pub mod sampler;
pub mod session;
pub mod timer;

pub use audio::{read_wav_file, AudioData, AudioSystem, Channel, Sound};
pub use config::{Config, SPECTRUM_SIZE};
pub use error::{Result, Severity, SpectralError};
pub use fft::{FftEffect, FftParameter, Spectrum, WindowType};
pub use pixel::{Endianness, FrameBuffer, PixelFormat, Surface};
pub use renderer::{BarHeights, BarRenderer, HeightPolicy, PERCEPTUAL_EXPONENT};
pub use sampler::{AveragedSpectrum, SpectrumFrame};
pub use session::{Command, PlaybackState, Session, Visualizer};
pub use timer::Timer;
