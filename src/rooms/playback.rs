use std::{sync::Arc, time::Duration};

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::{
    queue::{Queue, QueueError, QueueStatus, StackStatus},
    timer::{Timer, TimerError, TimerStatus},
};
use crate::{
    auth::Authorizer,
    clients::{Client, ClientId},
    streams::Stream,
};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("no playback exists for room {0:?}")]
    NoSuchPlayback(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}

/// The compound state guarded by the room lock. Every mutation of the
/// current stream, queue, or attribution goes through this one mutex, which
/// is what serializes commands against tick-driven auto-advance.
struct State {
    stream: Option<Arc<Stream>>,
    queue: Queue,
    started_by: String,
    last_updated: Instant,
}

/// The per-room playback state machine: one timer, one current stream, one
/// queue. Created lazily when the first client joins a room and reaped when
/// the room has been empty for long enough.
pub struct Playback {
    pub id: String,
    timer: Arc<Timer>,
    state: Mutex<State>,
}

/// What an end-of-stream check decided.
pub enum AdvanceOutcome {
    /// The queue had a next item; it is now the current stream and the
    /// clock restarted from zero.
    Loaded(Arc<Stream>),
    /// The queue was empty; playback stopped.
    Stopped,
}

impl Playback {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "a playback id is required");

        Self {
            id,
            timer: Timer::spawn(),
            state: Mutex::new(State {
                stream: None,
                queue: Queue::new(),
                started_by: String::new(),
                last_updated: Instant::now(),
            }),
        }
    }

    pub fn play(&self) {
        self.timer.play();
    }

    pub fn pause(&self) -> Result<(), TimerError> {
        self.timer.pause()
    }

    pub fn stop(&self) {
        self.timer.stop();
    }

    pub fn reset(&self) {
        self.timer.set(0);
    }

    pub fn set_time(&self, seconds: u64) {
        self.timer.set(seconds);
    }

    pub fn time(&self) -> u64 {
        self.timer.time()
    }

    pub fn on_tick(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        self.timer.on_tick(callback);
    }

    pub fn stream(&self) -> Option<Arc<Stream>> {
        self.state.lock().stream.clone()
    }

    /// Swaps the current stream and nothing else: the clock and attribution
    /// are untouched. The `stream set` path wants the fused [`load_stream`]
    /// instead.
    ///
    /// [`load_stream`]: Playback::load_stream
    pub fn set_stream(&self, stream: Arc<Stream>) {
        let mut state = self.state.lock();

        state.stream = Some(stream);
        state.last_updated = Instant::now();
    }

    /// Makes `stream` the current stream, restarts the clock, and records
    /// who loaded it. One critical section, so a concurrent skip or tick
    /// never observes a half-applied load.
    pub fn load_stream(&self, stream: Arc<Stream>, loaded_by: &Client) {
        let mut state = self.state.lock();

        state.stream = Some(stream);
        state.last_updated = Instant::now();

        if let Some(name) = loaded_by.username() {
            state.started_by = name;
        } else {
            warn!(
                "client {} loaded a stream without a registered username",
                loaded_by.id
            );
        }

        self.reset();
    }

    /// Pops the next queued item and makes it current, restarting the clock.
    /// Used by both the skip command and tick-driven auto-advance; the room
    /// lock is held across the pop and the swap, so the two can never
    /// double-pop.
    pub fn advance_queue(&self) -> Result<Arc<Stream>, QueueError> {
        let mut state = self.state.lock();

        let next = state.queue.next()?;
        state.stream = Some(next.clone());
        state.last_updated = Instant::now();
        self.reset();

        Ok(next)
    }

    /// The end-of-stream reaction of the tick callback: when the current
    /// stream has a known duration and the clock has reached it, advance the
    /// queue or stop. Returns `None` when nothing needed to happen.
    pub fn try_auto_advance(&self, at: u64) -> Option<AdvanceOutcome> {
        let mut state = self.state.lock();

        let duration = state.stream.as_ref()?.duration();

        if duration <= 0.0 || (at as f64) < duration {
            return None;
        }

        match state.queue.next() {
            Ok(next) => {
                state.stream = Some(next.clone());
                state.last_updated = Instant::now();
                self.reset();

                Some(AdvanceOutcome::Loaded(next))
            }
            Err(_) => {
                self.timer.stop();
                Some(AdvanceOutcome::Stopped)
            }
        }
    }

    pub fn push_to_queue(&self, owner: ClientId, stream: Arc<Stream>) {
        let mut state = self.state.lock();
        state.queue.push(owner, stream);
        state.last_updated = Instant::now();
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.state.lock().queue.status()
    }

    pub fn stack_status(&self, owner: ClientId) -> Result<StackStatus, QueueError> {
        self.state.lock().queue.stack_status(owner)
    }

    /// Records the client's username as the party that started playback.
    pub fn update_started_by(&self, client: &Client) {
        match client.username() {
            Some(name) => self.state.lock().started_by = name,
            None => warn!(
                "cannot attribute playback: client {} has no registered username",
                client.id
            ),
        }
    }

    /// Rewrites `started_by` after a username change: when the stored name
    /// is the client's previous username, it becomes the current one.
    /// Returns whether a replacement happened.
    pub fn refresh_info_from_client(&self, client: &Client) -> Result<bool, RoomError> {
        let Some(previous) = client.previous_username() else {
            return Ok(false);
        };

        // A client carrying a previous username always has a current one.
        let current = client.username().ok_or(RoomError::InvariantViolation(
            "client has a previous username but no current username",
        ))?;

        let mut state = self.state.lock();

        if state.started_by.is_empty() || state.started_by != previous {
            return Ok(false);
        }

        state.started_by = current;
        Ok(true)
    }

    /// Refreshes the room's idle clock, deferring the reaper.
    pub fn touch(&self) {
        self.state.lock().last_updated = Instant::now();
    }

    /// How long ago the room state last changed.
    pub fn idle_for(&self) -> Duration {
        self.state.lock().last_updated.elapsed()
    }

    /// Disconnect hygiene: defer the reaper and strip the subject from every
    /// role binding. Playback itself keeps running; an empty room keeps
    /// ticking until reaped.
    pub fn handle_disconnection(&self, subject: ClientId, authorizer: Option<&Authorizer>) {
        self.touch();

        if let Some(authorizer) = authorizer {
            authorizer.remove_subject(subject);
        }
    }

    /// The canonical serialized summary of this playback. With no stream
    /// set, the stream fields default to empty rather than poisoning every
    /// caller with a precondition.
    pub fn status(&self) -> StatusRecord {
        let state = self.state.lock();

        let (kind, stream_url, stream_duration) = state
            .stream
            .as_ref()
            .map(|s| (s.kind.to_string(), s.url.clone(), s.duration()))
            .unwrap_or_default();

        StatusRecord {
            kind,
            queue_length: state.queue.len(),
            started_by: state.started_by.clone(),
            stream_url,
            stream_duration,
            playback: self.timer.status(),
        }
    }
}

/// The status summary sent in `streamsync` and `streamload` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub kind: String,
    pub queue_length: usize,
    pub started_by: String,
    pub stream_url: String,
    pub stream_duration: f64,
    pub playback: TimerStatus,
}
