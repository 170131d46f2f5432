use std::sync::Arc;

/// Health of the watch connection as observed by snapshot consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnlineState {
    /// No verdict yet; reads should neither fail over to cache nor block.
    Unknown,
    /// The watch stream recently delivered a message.
    Healthy,
    /// The stream failed repeatedly or the network was disabled; consumers
    /// may serve cached data.
    Failed,
}

/// Sink for online-state transitions, e.g. to resolve pending reads against
/// the cache once the connection is known to be down.
pub trait OnlineStateDelegate: Send + Sync + 'static {
    fn on_online_state_changed(&self, state: OnlineState);
}

/// Consecutive watch-stream failures tolerated before reporting `Failed`.
pub const MAX_WATCH_STREAM_FAILURES: u32 = 2;

/// Tracks watch connectivity and notifies the delegate on genuine
/// transitions only.
pub struct OnlineStateTracker {
    state: OnlineState,
    watch_failures: u32,
    delegate: Option<Arc<dyn OnlineStateDelegate>>,
}

impl OnlineStateTracker {
    pub fn new(delegate: Option<Arc<dyn OnlineStateDelegate>>) -> Self {
        Self {
            state: OnlineState::Unknown,
            watch_failures: 0,
            delegate,
        }
    }

    pub fn state(&self) -> OnlineState {
        self.state
    }

    /// Any message from the backend proves the connection healthy.
    pub fn handle_message_received(&mut self) {
        self.watch_failures = 0;
        self.set(OnlineState::Healthy);
    }

    /// The stream closed while a restart is warranted. A healthy stream
    /// dropping is unremarkable; repeated failures without ever going
    /// healthy flip the state to `Failed`.
    pub fn handle_stream_failure(&mut self) {
        if self.state == OnlineState::Healthy {
            self.watch_failures = 0;
            self.set(OnlineState::Unknown);
        } else {
            self.watch_failures += 1;
            if self.watch_failures >= MAX_WATCH_STREAM_FAILURES {
                self.set(OnlineState::Failed);
            }
        }
    }

    /// Back to the initial state: the stream is gone but not failing (no
    /// active listens, or the network was just enabled).
    pub fn set_unknown(&mut self) {
        self.watch_failures = 0;
        self.set(OnlineState::Unknown);
    }

    /// The network was explicitly disabled or the client is shutting down.
    pub fn set_failed(&mut self) {
        self.watch_failures = 0;
        self.set(OnlineState::Failed);
    }

    /// Stops all future notifications; the state itself keeps updating.
    pub fn detach_delegate(&mut self) {
        self.delegate = None;
    }

    fn set(&mut self, new_state: OnlineState) {
        if new_state == self.state {
            return;
        }
        self.state = new_state;
        if let Some(delegate) = &self.delegate {
            delegate.on_online_state_changed(new_state);
        }
    }
}
