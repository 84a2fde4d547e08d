//! Event stream supervision with reconnect backoff and polling fallback
//!
//! While the stream is up, every event is handed to the event callback.
//! When it drops (or never comes up), the supervisor starts calling the poll
//! callback every `fallback_poll_ms` and reconnects after
//! `min(cap, base * 2^retry) + jitter`. A successful connect resets the
//! retry counter and stops polling.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use kaa_api::{ApiClient, AppEvent};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncConfig;

type EventFn = Arc<dyn Fn(AppEvent) + Send + Sync>;
type PollFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Connection state as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStatus {
    pub connected: bool,
    /// Failed attempts since the last successful connect
    pub retry: u32,
    pub polling: bool,
}

/// Reconnect delay after `retry` consecutive failures
#[must_use]
pub fn backoff_delay(retry: u32, config: &SyncConfig) -> Duration {
    let factor = 1_u64.checked_shl(retry).unwrap_or(u64::MAX);
    let base = config
        .backoff_base_ms
        .saturating_mul(factor)
        .min(config.backoff_cap_ms);
    let jitter = if config.backoff_jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..config.backoff_jitter_ms)
    };
    Duration::from_millis(base.saturating_add(jitter))
}

/// Background task keeping the event stream alive
#[derive(Debug)]
pub struct EventSupervisor {
    stop: watch::Sender<bool>,
    status: watch::Receiver<StreamStatus>,
    handle: Option<JoinHandle<()>>,
}

impl EventSupervisor {
    /// Start supervising
    ///
    /// `on_event` runs for each decoded event; `poll` runs on the fallback
    /// schedule while disconnected. Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn<E, P, Fut>(client: ApiClient, config: SyncConfig, on_event: E, poll: P) -> Self
    where
        E: Fn(AppEvent) + Send + Sync + 'static,
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StreamStatus::default());
        let poll: PollFn = Arc::new(move || poll().boxed());

        let worker = Worker {
            client,
            config,
            on_event: Arc::new(on_event),
            poll,
            status: status_tx,
            stop: stop_rx,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            stop: stop_tx,
            status: status_rx,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        *self.status.borrow()
    }

    /// Watch connection state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    /// Close the stream, stop polling and wait for the worker to exit
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Event supervisor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for EventSupervisor {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

struct Worker {
    client: ApiClient,
    config: SyncConfig,
    on_event: EventFn,
    poll: PollFn,
    status: watch::Sender<StreamStatus>,
    stop: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut retry: u32 = 0;
        let mut poller: Option<JoinHandle<()>> = None;

        loop {
            let stopped = *self.stop.borrow();
            if stopped {
                break;
            }
            let connected = tokio::select! {
                _ = self.stop.changed() => break,
                connected = self.client.events() => connected,
            };

            match connected {
                Ok(mut stream) => {
                    retry = 0;
                    if let Some(p) = poller.take() {
                        p.abort();
                    }
                    self.publish(true, retry, false);
                    tracing::info!("Event stream connected");

                    loop {
                        tokio::select! {
                            _ = self.stop.changed() => {
                                self.publish(false, retry, false);
                                return;
                            }
                            next = stream.next() => match next {
                                Some(Ok(event)) => (self.on_event)(event),
                                Some(Err(e)) => {
                                    tracing::warn!("Event stream error: {}", e);
                                    break;
                                }
                                None => {
                                    tracing::info!("Event stream closed by server");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => tracing::warn!("Event stream connect failed: {}", e),
            }

            retry = retry.saturating_add(1);
            if poller.is_none() {
                poller = Some(self.start_polling());
            }
            self.publish(false, retry, true);

            let delay = backoff_delay(retry, &self.config);
            tracing::info!("Reconnecting event stream in {:?} (attempt {})", delay, retry);
            tokio::select! {
                _ = self.stop.changed() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(p) = poller.take() {
            p.abort();
        }
        self.publish(false, retry, false);
    }

    fn start_polling(&self) -> JoinHandle<()> {
        let poll = Arc::clone(&self.poll);
        let period = self.config.fallback_poll();
        tracing::debug!("Falling back to polling every {:?}", period);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poll().await;
            }
        })
    }

    fn publish(&self, connected: bool, retry: u32, polling: bool) {
        self.status.send_replace(StreamStatus {
            connected,
            retry,
            polling,
        });
    }
}
