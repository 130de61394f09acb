use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use log::{error, info};

use crate::{clients::ClientRegistry, events::ServerEvent};

mod playback;
mod queue;
mod timer;

pub use playback::{AdvanceOutcome, Playback, RoomError, StatusRecord};
pub use queue::{Queue, QueueError, QueueStatus, StackStatus};
pub use timer::{Timer, TimerError, TimerState, TimerStatus};

/// Seconds between periodic streamsync broadcasts.
const SYNC_RATE: u64 = 10;
/// Seconds between periodic sync log lines.
const SYNC_LOG_RATE: u64 = 50;
/// Seconds between end-of-stream checks.
const END_CHECK_RATE: u64 = 2;
/// How often the reaper looks for dead rooms.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Owns every room's playback: lazy creation on first join, lookup by room
/// name, and reaping of rooms nobody has touched in a while.
pub struct RoomManager {
    clients: Weak<ClientRegistry>,
    playbacks: DashMap<String, Arc<Playback>>,
    grace: Duration,
}

impl RoomManager {
    pub fn new(clients: &Arc<ClientRegistry>, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            clients: Arc::downgrade(clients),
            playbacks: Default::default(),
            grace,
        })
    }

    pub fn get(&self, room: &str) -> Result<Arc<Playback>, RoomError> {
        self.playbacks
            .get(room)
            .map(|p| p.clone())
            .ok_or_else(|| RoomError::NoSuchPlayback(room.to_string()))
    }

    /// Returns the room's playback, creating it (and wiring up its tick
    /// callback) when this is the first join.
    pub fn get_or_create(&self, room: &str) -> Arc<Playback> {
        self.playbacks
            .entry(room.to_string())
            .or_insert_with(|| {
                info!("no playback existed for room {room}; creating one");

                let playback = Arc::new(Playback::new(room));
                self.register_tick_callback(&playback);
                playback
            })
            .clone()
    }

    /// Starts the background task that drops rooms with no members once
    /// their state has gone untouched past the grace period. Dropping a
    /// playback also ends its tick producer.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(manager) = manager.upgrade() else {
                    break;
                };

                manager.reap();
            }
        });
    }

    fn reap(&self) {
        let Some(clients) = self.clients.upgrade() else {
            return;
        };

        self.playbacks.retain(|room, playback| {
            let occupied = !clients.by_room(room).is_empty();
            let fresh = playback.idle_for() < self.grace;

            if occupied || fresh {
                return true;
            }

            info!("reaping room {room} after {}s idle", playback.idle_for().as_secs());
            false
        });
    }

    /// Wires the auto-advance behavior to the playback clock: every even
    /// tick checks for end of stream, every tenth tick reconciles members.
    fn register_tick_callback(&self, playback: &Arc<Playback>) {
        let clients = self.clients.clone();
        let playback_ref = Arc::downgrade(playback);
        let room = playback.id.clone();

        playback.on_tick(move |tick| {
            let Some(clients) = clients.upgrade() else {
                return;
            };
            let Some(playback) = playback_ref.upgrade() else {
                return;
            };

            if tick % END_CHECK_RATE == 0 {
                if let Some(outcome) = playback.try_auto_advance(tick) {
                    match &outcome {
                        AdvanceOutcome::Loaded(next) => {
                            info!("end of stream in room {room}; auto-queued {}", next.url);

                            match ServerEvent::stream_load(None, &playback.status()) {
                                Ok(event) => clients.broadcast_all(&room, &event),
                                Err(e) => error!("skipping streamload for room {room}: {e}"),
                            }
                        }
                        AdvanceOutcome::Stopped => {
                            info!("end of stream in room {room} with an empty queue; stopping");
                        }
                    }

                    info!("stream in room {room} ended after {tick} seconds");

                    match ServerEvent::stream_sync(None, &playback.status()) {
                        Ok(event) => clients.broadcast_all(&room, &event),
                        Err(e) => error!("skipping streamsync for room {room}: {e}"),
                    }
                }
            }

            if tick % SYNC_RATE != 0 {
                return;
            }

            if tick % SYNC_LOG_RATE == 0 {
                info!("reconciling room {room} at {tick} seconds");
            }

            match ServerEvent::stream_sync(None, &playback.status()) {
                Ok(event) => clients.broadcast_all(&room, &event),
                Err(e) => error!("skipping streamsync for room {room}: {e}"),
            }
        });
    }
}
