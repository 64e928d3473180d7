//! Playback session: owns the audio system, the sound, the analysis effect
//! and the shared surface, and arms the visualization tick.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, RwLock};

use crate::audio::{AudioSystem, Channel, Sound};
use crate::config::Config;
use crate::error::{Result, SpectralError};
use crate::fft::FftEffect;
use crate::pixel::{FrameBuffer, PixelFormat, Surface};
use crate::renderer::{BarHeights, BarRenderer};
use crate::sampler::{self, AveragedSpectrum};
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    TogglePause,
    Stop,
}

type ChannelSlot = Arc<RwLock<Option<Channel>>>;
type Presenter = Arc<dyn Fn() + Send + Sync>;

/// The handles one tick needs. Cloned into the timer thread when armed.
#[derive(Clone)]
pub struct Visualizer {
    surface: Arc<Surface>,
    channel: ChannelSlot,
    effect: Arc<FftEffect>,
    renderer: BarRenderer,
    presenter: Presenter,
}

impl Visualizer {
    /// Samples the current channel, repaints the surface and presents it.
    pub fn tick(&self) -> Result<BarHeights> {
        let channel = self
            .channel
            .read()
            .map_err(|_| SpectralError::Poisoned("channel slot"))?
            .clone();
        let spectrum = sampler::sample(channel.as_ref(), Some(&self.effect))?
            .map(|frame| frame.averaged())
            .unwrap_or_else(AveragedSpectrum::zeroed);
        let heights = self.renderer.render(&self.surface, &spectrum)?;
        (self.presenter)();
        Ok(heights)
    }
}

pub struct Session {
    config: Config,
    audio: AudioSystem,
    sound: Sound,
    effect: Arc<FftEffect>,
    surface: Arc<Surface>,
    channel: ChannelSlot,
    renderer: BarRenderer,
    presenter: Presenter,
    timer: Option<Timer>,
    failure: Arc<Mutex<Option<SpectralError>>>,
}

impl Session {
    /// Opens the default audio device and loads the configured sound.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let audio = AudioSystem::new(config.max_channels)?;
        Self::with_audio(config, audio)
    }

    pub fn with_audio(config: Config, audio: AudioSystem) -> Result<Self> {
        if config.audio_path.exists() {
            log::info!("music file found: {:?}", config.audio_path);
        } else {
            log::warn!("music file not found: {:?}", config.audio_path);
        }
        let sound = Sound::open(&config.audio_path)?;
        Self::with_sound(config, audio, sound)
    }

    pub fn with_sound(config: Config, audio: AudioSystem, sound: Sound) -> Result<Self> {
        config.validate()?;
        let effect = Arc::new(FftEffect::new(
            config.fft_window_size,
            config.fft_window_type,
        )?);
        let surface = Arc::new(Surface::new(FrameBuffer::new(
            config.width,
            config.height,
            PixelFormat::XRGB8888,
        )));
        let renderer = BarRenderer::new(config.height, config.height_policy);
        Ok(Self {
            config,
            audio,
            sound,
            effect,
            surface,
            channel: Arc::new(RwLock::new(None)),
            renderer,
            presenter: Arc::new(|| {}),
            timer: None,
            failure: Arc::new(Mutex::new(None)),
        })
    }

    /// Called after every tick. Must be set before the first `play`.
    pub fn set_presenter(&mut self, presenter: impl Fn() + Send + Sync + 'static) {
        if self.timer.is_some() {
            log::warn!("presenter replaced after the visualization was armed");
        }
        self.presenter = Arc::new(presenter);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audio(&self) -> &AudioSystem {
        &self.audio
    }

    pub fn effect(&self) -> &Arc<FftEffect> {
        &self.effect
    }

    pub fn surface(&self) -> Arc<Surface> {
        Arc::clone(&self.surface)
    }

    pub fn visualizer(&self) -> Visualizer {
        Visualizer {
            surface: Arc::clone(&self.surface),
            channel: Arc::clone(&self.channel),
            effect: Arc::clone(&self.effect),
            renderer: self.renderer.clone(),
            presenter: Arc::clone(&self.presenter),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    fn current_channel(&self) -> Result<Option<Channel>> {
        Ok(self
            .channel
            .read()
            .map_err(|_| SpectralError::Poisoned("channel slot"))?
            .clone())
    }

    pub fn state(&self) -> Result<PlaybackState> {
        let Some(channel) = self.current_channel()? else {
            return Ok(PlaybackState::Idle);
        };
        if !channel.is_playing()? {
            Ok(PlaybackState::Stopped)
        } else if channel.paused()? {
            Ok(PlaybackState::Paused)
        } else {
            Ok(PlaybackState::Playing)
        }
    }

    pub fn handle(&mut self, command: Command) -> Result<()> {
        log::debug!("command: {:?}", command);
        match command {
            Command::Play => self.play(),
            Command::TogglePause => self.toggle_pause(),
            Command::Stop => self.stop(),
        }
    }

    /// Restarts the sound from the beginning and arms the visualization if it
    /// is not armed yet.
    pub fn play(&mut self) -> Result<()> {
        if let Some(previous) = self.current_channel()? {
            previous.stop()?;
        }
        let channel = self.audio.play_sound(&self.sound, false)?;
        self.effect.reset()?;
        channel.add_effect(Arc::clone(&self.effect))?;
        log::info!("playing on channel {}", channel.id());
        *self
            .channel
            .write()
            .map_err(|_| SpectralError::Poisoned("channel slot"))? = Some(channel);

        if self.timer.is_none() {
            self.arm()?;
        } else {
            log::debug!("visualization already armed");
        }
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        let visualizer = self.visualizer();
        let failure = Arc::clone(&self.failure);
        let timer = Timer::arm(self.config.tick_period, move || {
            match visualizer.tick() {
                Ok(_) => ControlFlow::Continue(()),
                Err(e) if e.is_recoverable() => {
                    log::warn!("skipping frame: {}", e);
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    log::error!("visualization stopped: {}", e);
                    if let Ok(mut slot) = failure.lock() {
                        *slot = Some(e);
                    }
                    ControlFlow::Break(())
                }
            }
        })?;
        log::info!(
            "visualization armed, every {}ms",
            self.config.tick_period.as_millis()
        );
        self.timer = Some(timer);
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<()> {
        let channel = match self.current_channel()? {
            Some(channel) if channel.is_playing()? => channel,
            _ => {
                log::debug!("nothing playing to pause");
                return Ok(());
            }
        };
        let paused = !channel.paused()?;
        channel.set_paused(paused)?;
        log::info!("{}", if paused { "paused" } else { "resumed" });
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        match self.current_channel()? {
            Some(channel) => {
                channel.stop()?;
                log::info!("stopped channel {}", channel.id());
            }
            None => log::debug!("nothing playing to stop"),
        }
        Ok(())
    }

    /// Once per host loop iteration.
    pub fn update(&self) -> Result<()> {
        self.audio.update()
    }

    /// Fatal error that stopped the visualization tick, if any.
    pub fn take_failure(&self) -> Option<SpectralError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Removes the timer and stops playback. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.remove();
            log::info!("visualization timer removed");
        }
        match self.current_channel() {
            Ok(Some(channel)) => {
                if let Err(e) = channel.stop() {
                    log::warn!("channel {} not stopped on shutdown: {}", channel.id(), e);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("playback not stopped on shutdown: {}", e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use smallvec::smallvec;

    use super::*;

    fn session(frames: usize) -> Session {
        let config = Config {
            // keep the background tick out of the way; tests drive it by hand
            tick_period: Duration::from_secs(3600),
            ..Default::default()
        };
        let audio = AudioSystem::detached(2, 48_000, 2);
        let sound =
            Sound::from_samples(smallvec![vec![0.5; frames], vec![0.5; frames]], 48_000).unwrap();
        Session::with_sound(config, audio, sound).unwrap()
    }

    fn pump(session: &Session, frames: usize) {
        let mut out = vec![0.0; frames * session.audio().output_channels()];
        session.audio().render(&mut out);
    }

    #[test]
    fn playback_state_machine() {
        let mut session = session(48_000);
        assert_eq!(session.state().unwrap(), PlaybackState::Idle);
        assert!(!session.is_armed());

        session.handle(Command::TogglePause).unwrap();
        session.handle(Command::Stop).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Idle);

        session.handle(Command::Play).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Playing);
        assert!(session.is_armed());

        session.handle(Command::TogglePause).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Paused);
        session.handle(Command::TogglePause).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Playing);

        session.handle(Command::Stop).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Stopped);
        session.handle(Command::TogglePause).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Stopped);

        session.handle(Command::Play).unwrap();
        assert_eq!(session.state().unwrap(), PlaybackState::Playing);
    }

    #[test]
    fn finished_sound_is_stopped() {
        let mut session = session(100);
        session.play().unwrap();
        pump(&session, 200);
        assert_eq!(session.state().unwrap(), PlaybackState::Stopped);
        session.update().unwrap();
        assert_eq!(session.audio().active_channels(), 0);
    }

    #[test]
    fn replay_restarts_and_keeps_one_timer() {
        let mut session = session(48_000);
        session.play().unwrap();
        let first = session.current_channel().unwrap().unwrap();
        let armed_on = session.timer.as_ref().and_then(Timer::thread_id);
        assert!(armed_on.is_some());
        pump(&session, 4096);
        session.play().unwrap();
        let second = session.current_channel().unwrap().unwrap();
        let timer = session.timer.as_ref().unwrap();
        assert_eq!(timer.thread_id(), armed_on);
        assert!(timer.is_running());
        assert_ne!(first, second);
        assert!(!first.is_playing().unwrap());
        assert_eq!(second.position().unwrap(), Duration::ZERO);
        assert!(second.has_effect(session.effect()).unwrap());
        assert!(session.is_armed());
        assert_eq!(session.audio().active_channels(), 1);
    }

    #[test]
    fn idle_tick_clears_to_black_and_presents() {
        let mut session = session(48_000);
        let presented = Arc::new(AtomicUsize::new(0));
        let counter = presented.clone();
        session.set_presenter(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let heights = session.visualizer().tick().unwrap();
        assert!(heights.iter().all(|&h| h == 511));
        assert_eq!(presented.load(Ordering::SeqCst), 1);
        assert_eq!(session.surface().generation(), 1);
        let corner = session.surface().read(|fb| fb.rgb_at(0, 511)).unwrap();
        assert_eq!(corner, Some([0, 0, 0]));
    }

    #[test]
    fn tick_follows_playback() {
        let mut session = session(48_000);
        session.play().unwrap();
        pump(&session, 2048);
        let visualizer = session.visualizer();

        // constant signal: DC bin at full scale
        let heights = visualizer.tick().unwrap();
        assert_eq!(heights[0], 0);
        assert!(heights[1] > 400);

        session.toggle_pause().unwrap();
        assert_eq!(visualizer.tick().unwrap()[0], 0);

        session.stop().unwrap();
        assert!(visualizer.tick().unwrap().iter().all(|&h| h == 511));
        assert!(session.take_failure().is_none());
    }

    #[test]
    fn shutdown_removes_timer() {
        let mut session = session(48_000);
        session.play().unwrap();
        session.shutdown();
        assert!(!session.is_armed());
        assert_eq!(session.state().unwrap(), PlaybackState::Stopped);
        session.shutdown();
    }

    #[test]
    fn shutdown_reports_but_survives_a_poisoned_slot() {
        let mut session = session(48_000);
        session.play().unwrap();
        let slot = Arc::clone(&session.channel);
        let _ = std::thread::spawn(move || {
            let _guard = slot.write().unwrap();
            panic!("poison the channel slot");
        })
        .join();
        assert!(matches!(session.state(), Err(SpectralError::Poisoned(_))));

        session.shutdown();
        assert!(!session.is_armed());
    }
}
