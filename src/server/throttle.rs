//! Reload throttling.
//!
//! Coalesces bursts of configuration changes so that at most one value is
//! published per window:
//!
//! ```text
//! Idle      + value  → publish now, open window     → Windowed
//! Windowed  + value  → replace pending              → Windowed
//! Windowed  + timer  → publish pending, new window  → Windowed
//!                      (nothing pending)            → Idle
//! any       + stop   → exit, pending dropped
//! ```
//!
//! The first value of a burst is published immediately and the last one is
//! always published at the end of the window it arrived in.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("throttle duration must be greater than zero")]
    InvalidDuration,
}

#[derive(Debug)]
enum ThrottleState<T> {
    Idle,
    Windowed { deadline: Instant, pending: Option<T> },
}

pub struct ThrottleReloader<T> {
    duration: Duration,
    source: mpsc::Receiver<T>,
    publish: mpsc::Sender<T>,
    stop: broadcast::Receiver<()>,
}

impl<T: Send + 'static> ThrottleReloader<T> {
    pub fn new(
        duration: Duration,
        source: mpsc::Receiver<T>,
        publish: mpsc::Sender<T>,
        stop: broadcast::Receiver<()>,
    ) -> Result<Self, ThrottleError> {
        if duration.is_zero() {
            return Err(ThrottleError::InvalidDuration);
        }
        Ok(Self {
            duration,
            source,
            publish,
            stop,
        })
    }

    /// Run until stopped, until the publish side is closed, or until the
    /// source is closed and nothing is left to flush.
    pub async fn run(mut self) {
        let mut state = ThrottleState::Idle;
        let mut source_open = true;

        loop {
            state = match state {
                ThrottleState::Idle => {
                    if !source_open {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = self.stop.recv() => break,
                        value = self.source.recv() => match value {
                            Some(value) => {
                                if !self.deliver(value).await {
                                    break;
                                }
                                self.open_window()
                            }
                            None => break,
                        },
                    }
                }
                ThrottleState::Windowed { deadline, mut pending } => {
                    tokio::select! {
                        biased;
                        _ = self.stop.recv() => {
                            if pending.is_some() {
                                tracing::debug!("Stopping with a pending reload, dropping it");
                            }
                            break;
                        }
                        _ = sleep_until(deadline) => match pending.take() {
                            Some(value) => {
                                if !self.deliver(value).await {
                                    break;
                                }
                                self.open_window()
                            }
                            None => ThrottleState::Idle,
                        },
                        value = self.source.recv(), if source_open => match value {
                            Some(value) => {
                                if pending.is_some() {
                                    tracing::trace!("Coalescing reload into pending one");
                                }
                                ThrottleState::Windowed { deadline, pending: Some(value) }
                            }
                            None => {
                                source_open = false;
                                ThrottleState::Windowed { deadline, pending }
                            }
                        },
                    }
                }
            };
        }

        tracing::debug!("Throttle loop stopped");
    }

    fn open_window(&self) -> ThrottleState<T> {
        ThrottleState::Windowed {
            deadline: Instant::now() + self.duration,
            pending: None,
        }
    }

    /// Publish one value. A full publish channel still observes `stop`.
    /// Returns false when the loop must exit.
    async fn deliver(&mut self, value: T) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.recv() => {
                tracing::debug!("Stop requested while publishing, dropping reload");
                false
            }
            sent = self.publish.send(value) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("Reload consumer gone");
                    false
                }
            },
        }
    }
}
