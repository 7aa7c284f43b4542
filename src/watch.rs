//! ChangeWatcher boundary
//!
//! The OS-level watch primitive is an external collaborator; the engine
//! only consumes its event stream. This module bridges that stream (any
//! channel of [`WatchEvent`]s) to the scanner: events are batched over a
//! short settle interval so a burst of notifications for one save becomes
//! one incremental scan trigger, and triggers arriving while a scan is
//! active coalesce inside the engine's worker slot.

use crate::engine::Engine;
use crate::types::WatchEvent;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Default settle interval for batching watcher bursts
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Pump an external watcher's event stream into the engine
///
/// Blocks on the receiver; after the first event of a burst it keeps
/// collecting until `settle` elapses with no further events, then hands
/// the whole batch to [`Engine::handle_watch_events`]. Returns when the
/// sending side disconnects.
pub fn pump(engine: Arc<Engine>, events: Receiver<WatchEvent>, settle: Duration) {
    info!("watch pump running");
    loop {
        let first = match events.recv() {
            Ok(event) => event,
            Err(_) => break,
        };

        let mut batch = vec![first];
        loop {
            match events.recv_timeout(settle) {
                Ok(event) => batch.push(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("watcher stream closed mid-burst");
                    break;
                }
            }
        }

        debug!("settled batch of {} watch events", batch.len());
        engine.handle_watch_events(batch);
    }
    info!("watch pump stopped");
}

/// Spawn [`pump`] on its own thread
pub fn spawn_pump(
    engine: Arc<Engine>,
    events: Receiver<WatchEvent>,
    settle: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("retrace-watch-pump".to_string())
        .spawn(move || pump(engine, events, settle))
        .expect("spawning the watch pump thread")
}
