use std::ops::ControlFlow;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::error::{Result, SpectralError};

/// Runs a callback every `period` on its own thread until removed or until
/// the callback breaks.
pub struct Timer {
    period: Duration,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn arm<F>(period: Duration, callback: F) -> Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let builder = thread::Builder::new().name("spectral-timer".to_string());
        Self::spawn(builder, period, callback)
    }

    fn spawn<F>(builder: thread::Builder, period: Duration, mut callback: F) -> Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = builder
            .spawn(move || loop {
                match cancelled.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if callback().is_break() {
                            log::debug!("timer callback cancelled itself");
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| SpectralError::Timer(e.to_string()))?;
        Ok(Self {
            period,
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Id of the thread driving the callback, `None` once removed.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Stops the timer and waits for an in-flight tick to finish.
    pub fn remove(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_until_removed() {
        let count = Arc::new(AtomicUsize::new(0));
        let ticks = count.clone();
        let mut timer = Timer::arm(Duration::from_millis(1), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();
        while count.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(timer.is_running());
        assert!(timer.thread_id().is_some());
        timer.remove();
        assert!(!timer.is_running());
        assert!(timer.thread_id().is_none());
        let after = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after);
    }

    #[test]
    fn callback_can_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let ticks = count.clone();
        let mut timer = Timer::arm(Duration::from_millis(1), move || {
            if ticks.fetch_add(1, Ordering::SeqCst) == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        while timer.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        timer.remove();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn spawn_failure_is_fatal() {
        // no system can map an exabyte of stack
        let builder = thread::Builder::new().stack_size(1 << 60);
        let err = Timer::spawn(builder, Duration::from_millis(1), || ControlFlow::Continue(()))
            .err()
            .unwrap();
        assert!(matches!(err, SpectralError::Timer(_)));
        assert!(!err.is_recoverable());
    }
}
