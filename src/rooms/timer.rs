use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time;

pub type TickCallback = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("cannot pause a timer that is not playing")]
    InvalidState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Stopped,
    Playing,
    Paused,
}

/// The playback clock of one room: a second-granularity counter advanced by
/// a detached task while playing. The task holds a weak reference and exits
/// when the timer is dropped, so reaping a room stops its producer.
pub struct Timer {
    state: AtomicCell<TimerState>,
    seconds: AtomicCell<u64>,
    callback: Mutex<Option<TickCallback>>,
}

impl Timer {
    pub fn spawn() -> Arc<Self> {
        let timer = Arc::new(Self {
            state: AtomicCell::new(TimerState::Stopped),
            seconds: AtomicCell::new(0),
            callback: Default::default(),
        });

        tokio::spawn(run_ticks(Arc::downgrade(&timer)));
        timer
    }

    /// Starts or resumes counting. Playing an already playing timer is a
    /// no-op.
    pub fn play(&self) {
        self.state.store(TimerState::Playing);
    }

    pub fn pause(&self) -> Result<(), TimerError> {
        if self.state.load() != TimerState::Playing {
            return Err(TimerError::InvalidState);
        }

        self.state.store(TimerState::Paused);
        Ok(())
    }

    /// Stops counting and zeroes the clock. Idempotent.
    pub fn stop(&self) {
        self.state.store(TimerState::Stopped);
        self.seconds.store(0);
    }

    /// Moves the clock to an arbitrary second. Legal in every state.
    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds);
    }

    pub fn time(&self) -> u64 {
        self.seconds.load()
    }

    pub fn state(&self) -> TimerState {
        self.state.load()
    }

    /// Registers the callback invoked with the new time after every
    /// increment. A timer has at most one callback.
    pub fn on_tick(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        *self.callback.lock() = Some(Box::new(callback));
    }

    pub fn status(&self) -> TimerStatus {
        TimerStatus {
            state: self.state.load(),
            time: self.seconds.load(),
        }
    }

    fn advance(&self) {
        if self.state.load() != TimerState::Playing {
            return;
        }

        let now = self.seconds.fetch_add(1) + 1;

        if let Some(callback) = &*self.callback.lock() {
            callback(now);
        }
    }
}

async fn run_ticks(timer: Weak<Timer>) {
    let mut interval = time::interval(Duration::from_secs(1));

    // The first tick of an interval completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        let Some(timer) = timer.upgrade() else {
            break;
        };

        timer.advance();
    }
}

/// The wire form of the clock, embedded in every status record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerStatus {
    pub state: TimerState,
    pub time: u64,
}
