use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{internal_error, DocSyncError, DocSyncResult};
use crate::remote::connection::{RawStream, StreamKind, StreamingConnection};
use crate::remote::datastore::RetrySettings;
use crate::runtime;

/// How long an idle stream stays connected before it is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Decoded-frame callbacks a concrete stream layers on top of the runner.
#[async_trait]
pub(crate) trait StreamEvents: Send + Sync + 'static {
    async fn handle_open(&self) -> DocSyncResult<()>;
    async fn handle_message(&self, payload: Vec<u8>) -> DocSyncResult<()>;
    async fn handle_close(&self, error: Option<DocSyncError>);
}

/// Shared machinery of the two persistent streams: one connection attempt
/// per `start()`, exponential backoff carried across restarts, an idle
/// timer, and a generation counter that fences off every callback once
/// `stop()` has run.
pub(crate) struct StreamRunner {
    label: &'static str,
    kind: StreamKind,
    connection: Arc<dyn StreamingConnection>,
    started: AtomicBool,
    open: AtomicBool,
    idle: AtomicBool,
    generation: AtomicU64,
    raw: StdMutex<Option<Arc<dyn RawStream>>>,
    backoff: StdMutex<Backoff>,
}

impl StreamRunner {
    pub(crate) fn new(
        label: &'static str,
        kind: StreamKind,
        connection: Arc<dyn StreamingConnection>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            label,
            kind,
            connection,
            started: AtomicBool::new(false),
            open: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            raw: StdMutex::new(None),
            backoff: StdMutex::new(Backoff::new(retry)),
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn start<E: StreamEvents>(self: &Arc<Self>, events: Arc<E>) {
        assert!(
            !self.started.swap(true, Ordering::SeqCst),
            "{} stream started twice",
            self.label
        );
        self.idle.store(false, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let runner = Arc::clone(self);
        runtime::spawn_detached(async move {
            runner.run(generation, events).await;
        });
    }

    /// Fences off all callbacks for the current session and closes the
    /// underlying stream. After this returns no `StreamEvents` method fires
    /// until the next `start()`.
    pub(crate) async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.idle.store(false, Ordering::SeqCst);
        let raw = self.raw.lock().expect("raw stream lock").take();
        if let Some(raw) = raw {
            let _ = raw.close().await;
        }
    }

    pub(crate) async fn send(&self, payload: Vec<u8>) -> DocSyncResult<()> {
        self.idle.store(false, Ordering::SeqCst);
        let raw = self.raw.lock().expect("raw stream lock").clone();
        match raw {
            Some(raw) => raw.send(payload).await,
            None => Err(internal_error(format!(
                "{} stream is not open",
                self.label
            ))),
        }
    }

    pub(crate) fn inhibit_backoff(&self) {
        self.backoff.lock().expect("backoff lock").reset();
    }

    /// Schedules a close if the stream stays unused for `IDLE_TIMEOUT`. Any
    /// send cancels the timer.
    pub(crate) fn mark_idle(self: &Arc<Self>) {
        if !self.is_started() || self.idle.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let runner = Arc::clone(self);
        runtime::spawn_detached(async move {
            runtime::sleep(IDLE_TIMEOUT).await;
            if runner.idle.load(Ordering::SeqCst)
                && !runner.is_stale(generation)
                && runner.is_started()
            {
                log::debug!("{} stream idle; closing", runner.label);
                runner.stop().await;
            }
        });
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Marks the session over from the run loop's side, keeping the
    /// generation so a restart from the close callback starts clean.
    fn finish(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.raw.lock().expect("raw stream lock").take();
    }

    async fn run<E: StreamEvents>(self: Arc<Self>, generation: u64, events: Arc<E>) {
        let delay = self.backoff.lock().expect("backoff lock").next_delay();
        runtime::sleep(delay).await;
        if self.is_stale(generation) {
            return;
        }

        let opened = match self.kind {
            StreamKind::Watch => self.connection.open_watch_stream().await,
            StreamKind::Write => self.connection.open_write_stream().await,
        };
        let raw = match opened {
            Ok(raw) => raw,
            Err(err) => {
                if !self.is_stale(generation) {
                    self.finish();
                    events.handle_close(Some(err)).await;
                }
                return;
            }
        };

        if self.is_stale(generation) {
            let _ = raw.close().await;
            return;
        }
        *self.raw.lock().expect("raw stream lock") = Some(Arc::clone(&raw));
        self.open.store(true, Ordering::SeqCst);
        self.backoff.lock().expect("backoff lock").reset();

        if let Err(err) = events.handle_open().await {
            let _ = raw.close().await;
            if !self.is_stale(generation) {
                self.finish();
                events.handle_close(Some(err)).await;
            }
            return;
        }

        loop {
            let message = raw.next().await;
            if self.is_stale(generation) {
                return;
            }
            let error = match message {
                Some(Ok(payload)) => match events.handle_message(payload).await {
                    Ok(()) => continue,
                    Err(err) => Some(err),
                },
                Some(Err(err)) => Some(err),
                None => None,
            };
            let _ = raw.close().await;
            if !self.is_stale(generation) {
                self.finish();
                events.handle_close(error).await;
            }
            return;
        }
    }
}

pub(crate) struct Backoff {
    settings: RetrySettings,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            attempt: 0,
        }
    }

    /// The first attempt connects immediately; subsequent attempts wait
    /// exponentially longer up to the configured maximum.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = if self.attempt == 0 {
            Duration::ZERO
        } else {
            let factor = self.settings.multiplier.powi(self.attempt as i32 - 1);
            self.settings
                .initial_delay
                .mul_f64(factor)
                .min(self.settings.max_delay)
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let settings = RetrySettings {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        };
        let mut backoff = Backoff::new(settings);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn reset_restores_immediate_attempt() {
        let mut backoff = Backoff::new(RetrySettings::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
