//! Sound loading, playback channels and the output mixer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SizedSample,
};
use hound::WavReader;
use smallvec::{smallvec as svec, SmallVec};

use crate::error::{Result, SpectralError};
use crate::fft::FftEffect;

pub type AudioData = SmallVec<[Vec<f32>; 2]>;

/// Decodes a PCM or float WAV file into one sample vector per channel.
pub fn read_wav_file<P: AsRef<Path>>(path: P) -> Result<(AudioData, u32), hound::Error> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    log::debug!("sample spec: {:?}", spec);
    let num_channels = spec.channels as usize;
    let mut data: AudioData = svec![];
    for _ in 0..num_channels {
        data.push(Vec::new());
    }

    let mut sample_count = 0;

    match spec.sample_format {
        hound::SampleFormat::Int => match spec.bits_per_sample {
            8 => {
                for result in reader.samples::<i8>() {
                    let sample = result? as f32 / i8::MAX as f32;
                    data[sample_count % num_channels].push(sample);
                    sample_count += 1;
                }
            }

            16 => {
                for result in reader.samples::<i16>() {
                    let sample = result? as f32 / i16::MAX as f32;
                    data[sample_count % num_channels].push(sample);
                    sample_count += 1;
                }
            }

            24 => {
                for result in reader.samples::<i32>() {
                    let sample = result?;
                    let sample = if sample & (1 << 23) != 0 {
                        (sample | !0xff_ffff) as f32
                    } else {
                        sample as f32
                    };
                    let sample = sample / (1 << 23) as f32;
                    data[sample_count % num_channels].push(sample);
                    sample_count += 1;
                }
            }

            32 => {
                for result in reader.samples::<i32>() {
                    let sample = result? as f32 / i32::MAX as f32;
                    data[sample_count % num_channels].push(sample);
                    sample_count += 1;
                }
            }
            _ => return Err(hound::Error::Unsupported),
        },
        hound::SampleFormat::Float => {
            for result in reader.samples::<f32>() {
                let sample = result?;
                data[sample_count % num_channels].push(sample);
                sample_count += 1;
            }
        }
    }

    Ok((data, spec.sample_rate))
}

fn shortest(data: &AudioData) -> usize {
    data.iter().map(Vec::len).min().unwrap_or(0)
}

/// A decoded sound, cheap to clone and share with playing channels.
#[derive(Clone)]
pub struct Sound {
    data: Arc<AudioData>,
    sample_rate: u32,
    path: Option<PathBuf>,
}

impl Sound {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (mut data, sample_rate) =
            read_wav_file(path).map_err(|source| SpectralError::SoundLoad {
                path: path.to_path_buf(),
                source,
            })?;
        // a file cut mid-frame leaves the trailing channels one sample short
        let frames = shortest(&data);
        for channel in data.iter_mut() {
            channel.truncate(frames);
        }
        let sound = Self {
            data: Arc::new(data),
            sample_rate,
            path: Some(path.to_path_buf()),
        };
        log::info!(
            "loaded {:?}: {} channel(s) @ {}Hz, {:.1}s",
            path,
            sound.channels(),
            sample_rate,
            sound.duration().as_secs_f32()
        );
        Ok(sound)
    }

    /// Wraps decoded samples; every channel must hold the same number of
    /// frames.
    pub fn from_samples(data: AudioData, sample_rate: u32) -> Result<Self> {
        let frames = shortest(&data);
        if data.iter().any(|channel| channel.len() != frames) {
            let lengths: Vec<usize> = data.iter().map(Vec::len).collect();
            return Err(SpectralError::InvalidSound(format!(
                "channel lengths differ: {:?}",
                lengths
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            sample_rate,
            path: None,
        })
    }

    pub fn channels(&self) -> usize {
        self.data.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        shortest(&self.data)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

struct ChannelInner {
    sound: Sound,
    /// Playhead in source frames; fractional when resampling.
    position: f64,
    paused: bool,
    stopped: bool,
    effects: Vec<Arc<FftEffect>>,
    tap: Vec<f32>,
}

/// Handle to one playing instance of a [`Sound`].
#[derive(Clone)]
pub struct Channel {
    id: u64,
    inner: Arc<Mutex<ChannelInner>>,
}

impl Channel {
    fn new(id: u64, sound: Sound, paused: bool) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(ChannelInner {
                sound,
                position: 0.0,
                paused,
                stopped: false,
                effects: Vec::new(),
                tap: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChannelInner>> {
        self.inner
            .lock()
            .map_err(|_| SpectralError::Poisoned("channel"))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.lock()?.paused = paused;
        Ok(())
    }

    pub fn paused(&self) -> Result<bool> {
        Ok(self.lock()?.paused)
    }

    pub fn stop(&self) -> Result<()> {
        self.lock()?.stopped = true;
        Ok(())
    }

    /// False once stopped or once the sound has played to the end.
    pub fn is_playing(&self) -> Result<bool> {
        Ok(!self.lock()?.stopped)
    }

    pub fn position(&self) -> Result<Duration> {
        let inner = self.lock()?;
        let rate = inner.sound.sample_rate.max(1) as f64;
        Ok(Duration::from_secs_f64(inner.position / rate))
    }

    /// Attaches an analysis effect; attaching the same effect twice is a no-op.
    pub fn add_effect(&self, effect: Arc<FftEffect>) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.effects.iter().any(|e| Arc::ptr_eq(e, &effect)) {
            inner.effects.push(effect);
        }
        Ok(())
    }

    pub fn has_effect(&self, effect: &Arc<FftEffect>) -> Result<bool> {
        Ok(self.lock()?.effects.iter().any(|e| Arc::ptr_eq(e, effect)))
    }

    /// Adds this channel's next frames into `output` and feeds its effects
    /// with the source frames consumed.
    fn render(&self, output: &mut [f32], out_channels: usize, out_rate: u32) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        let inner = &mut *guard;
        if inner.paused || inner.stopped || out_channels == 0 || out_rate == 0 {
            return;
        }
        let data = Arc::clone(&inner.sound.data);
        let src_channels = data.len();
        let frames = shortest(&data);
        if src_channels == 0 || frames == 0 {
            inner.stopped = true;
            return;
        }

        let step = inner.sound.sample_rate as f64 / out_rate as f64;
        let start = inner.position as usize;
        for frame in output.chunks_exact_mut(out_channels) {
            let index = inner.position as usize;
            if index >= frames {
                inner.stopped = true;
                break;
            }
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample += data[c % src_channels][index];
            }
            inner.position += step;
        }
        let end = (inner.position as usize).min(frames);

        if inner.effects.is_empty() || end <= start {
            return;
        }
        inner.tap.clear();
        for index in start..end {
            for channel in data.iter() {
                inner.tap.push(channel[index]);
            }
        }
        for effect in inner.effects.iter() {
            effect.process(&inner.tap, src_channels, inner.sound.sample_rate);
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

#[derive(Clone)]
struct Mixer {
    channels: Arc<Mutex<Vec<Channel>>>,
}

impl Mixer {
    fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn mix(&self, output: &mut [f32], out_channels: usize, out_rate: u32) {
        output.fill(0.0);
        let Ok(channels) = self.channels.lock() else {
            return;
        };
        for channel in channels.iter() {
            channel.render(output, out_channels, out_rate);
        }
        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Output device plus the pool of channels mixed into it.
pub struct AudioSystem {
    mixer: Mixer,
    max_channels: usize,
    sample_rate: u32,
    output_channels: usize,
    next_id: AtomicU64,
    _stream: Option<cpal::Stream>,
}

impl AudioSystem {
    /// Opens the default output device and starts mixing into it.
    pub fn new(max_channels: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(SpectralError::NoOutputDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| SpectralError::Stream(e.to_string()))?;

        log::info!(
            "audio: {} @ {}Hz, {} channel(s)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate().0,
            config.channels()
        );

        let mixer = Mixer::new();
        let sample_rate = config.sample_rate().0;
        let output_channels = config.channels() as usize;
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => play::<f32>(&device, &config.into(), mixer.clone()),
            cpal::SampleFormat::I16 => play::<i16>(&device, &config.into(), mixer.clone()),
            cpal::SampleFormat::U16 => play::<u16>(&device, &config.into(), mixer.clone()),
            other => Err(SpectralError::UnsupportedFormat(format!("{:?}", other))),
        }?;

        Ok(Self {
            mixer,
            max_channels: max_channels.max(1),
            sample_rate,
            output_channels,
            next_id: AtomicU64::new(1),
            _stream: Some(stream),
        })
    }

    /// A mixer with no device behind it; pull audio with [`AudioSystem::render`].
    pub fn detached(max_channels: usize, sample_rate: u32, output_channels: usize) -> Self {
        Self {
            mixer: Mixer::new(),
            max_channels: max_channels.max(1),
            sample_rate,
            output_channels,
            next_id: AtomicU64::new(1),
            _stream: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Starts `sound` from the beginning on a new channel. When every channel
    /// is busy the oldest one is stopped and reused.
    pub fn play_sound(&self, sound: &Sound, paused: bool) -> Result<Channel> {
        let channel = Channel::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            sound.clone(),
            paused,
        );
        let mut channels = self
            .mixer
            .channels
            .lock()
            .map_err(|_| SpectralError::Poisoned("mixer"))?;
        channels.retain(|c| c.is_playing().unwrap_or(false));
        while channels.len() >= self.max_channels {
            let stolen = channels.remove(0);
            log::debug!("channel pool full, stealing channel {}", stolen.id());
            stolen.stop()?;
        }
        channels.push(channel.clone());
        Ok(channel)
    }

    /// Mixes the next `output.len() / output_channels` frames into `output`.
    /// Only meaningful for a detached system; a device stream pulls on its own.
    pub fn render(&self, output: &mut [f32]) {
        self.mixer
            .mix(output, self.output_channels, self.sample_rate);
    }

    /// Per-iteration bookkeeping: drops channels that have finished.
    pub fn update(&self) -> Result<()> {
        let mut channels = self
            .mixer
            .channels
            .lock()
            .map_err(|_| SpectralError::Poisoned("mixer"))?;
        let before = channels.len();
        channels.retain(|c| c.is_playing().unwrap_or(false));
        if channels.len() != before {
            log::debug!("released {} finished channel(s)", before - channels.len());
        }
        Ok(())
    }

    pub fn active_channels(&self) -> usize {
        self.mixer
            .channels
            .lock()
            .map(|c| c.iter().filter(|c| c.is_playing().unwrap_or(false)).count())
            .unwrap_or(0)
    }
}

fn play<T>(device: &cpal::Device, config: &cpal::StreamConfig, mixer: Mixer) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    let err_fn = |err| log::error!("an error occurred on stream: {}", err);

    let mut scratch: Vec<f32> = Vec::new();
    let stream = device
        .build_output_stream(
            config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(output.len(), 0.0);
                mixer.mix(&mut scratch, channels, sample_rate);
                for (sample, &value) in output.iter_mut().zip(scratch.iter()) {
                    *sample = T::from_sample(value);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| SpectralError::Stream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SpectralError::Stream(e.to_string()))?;
    Ok(stream)
}
