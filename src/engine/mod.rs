mod availability;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::{EngineError, Entity};
pub use store::InMemoryStore;
pub(crate) use mutations::today;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedInstanceState = Arc<RwLock<InstanceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and made durable with a single fsync; every sender in the batch
/// gets the shared outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {} events failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    let result = appended.and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.discard_unflushed()
    {
        tracing::error!("could not discard failed WAL batch: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Booking state for the whole catalog.
///
/// Every instance sits behind its own `RwLock`; holding an instance's write
/// guard across "is it free" and "record the booking" is what makes a claim
/// atomic. No lock is held across more than one instance at a time.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            notify,
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // Never use blocking_write here: this runs inside the runtime.
        for event in &events {
            if engine.store.apply_catalog_event(event) {
                continue;
            }
            if let Some(instance_id) = event.instance_id()
                && let Some(rs) = engine.store.get_instance(&instance_id)
                && let Ok(mut guard) = rs.try_write()
            {
                engine.store.apply_event(&mut guard, event);
            }
        }
        tracing::debug!(
            "replayed {} events: {} types, {} instances, {} bookings",
            events.len(),
            engine.store.type_count(),
            engine.store.instance_count(),
            engine.store.booking_count()
        );

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply under the caller's write guard.
    /// Nothing is applied in memory if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut InstanceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(rs, event);
        Ok(())
    }

    /// Lookup booking → instance, acquire that instance's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<InstanceState>, EngineError> {
        let instance_id = self
            .store
            .get_instance_for_booking(booking_id)
            .ok_or_else(|| EngineError::not_found(Entity::Booking, booking_id))?;
        let rs = self
            .store
            .get_instance(&instance_id)
            .ok_or_else(|| EngineError::not_found(Entity::Instance, instance_id))?;
        Ok(rs.write_owned().await)
    }

    pub fn has_catalog(&self) -> bool {
        self.store.type_count() > 0
    }
}
