mod availability;
mod confirmation;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{conflicts_with, first_conflict, free_rooms, is_available};
pub use confirmation::{CodeGenerator, ConfirmationCode};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One hotel property: rooms, guests and the bookings between them.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) users: DashMap<Ulid, UserRecord>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) codes: CodeGenerator,
    /// Booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Confirmation code → booking id. Also the uniqueness constraint on codes.
    pub(super) code_index: DashMap<String, Ulid>,
    /// Normalized email → user id.
    pub(super) email_index: DashMap<String, Ulid>,
    /// User id → booking ids, for history and cascading deletes.
    pub(super) user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Shared by every mutation; exclusive for user deletion and WAL compaction.
    pub(super) gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, codes: CodeGenerator) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            wal_tx,
            codes,
            booking_to_room: DashMap::new(),
            code_index: DashMap::new(),
            email_index: DashMap::new(),
            user_bookings: DashMap::new(),
            gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            match event_room_id(event) {
                Some(room_id) => {
                    if let Some(rs) = engine.get_room_state(&room_id) {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.apply_to_room(&mut guard, event);
                    }
                }
                None => engine.apply_global(event),
            }
        }
        tracing::debug!(
            "replayed {} events: {} rooms, {} users, {} bookings",
            events.len(),
            engine.rooms.len(),
            engine.users.len(),
            engine.booking_to_room.len()
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

    pub(super) fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append then apply, with the room's write lock held by the caller.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_room(rs, event);
        Ok(())
    }

    /// WAL-append then apply an event that lives outside any room.
    pub(super) async fn persist_and_apply_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_global(event);
        Ok(())
    }

    /// Lookup booking → room, get room, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }

    /// Apply a room-scoped event to a RoomState (caller holds the lock).
    fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingConfirmed {
                id,
                room_id,
                user_id,
                stay,
                adults,
                children,
                confirmation_code,
            } => {
                rs.insert_booking(BookingRecord {
                    id: *id,
                    user_id: *user_id,
                    stay: *stay,
                    adults: *adults,
                    children: *children,
                    confirmation_code: confirmation_code.clone(),
                });
                self.booking_to_room.insert(*id, *room_id);
                self.code_index.insert(confirmation_code.clone(), *id);
                self.user_bookings.entry(*user_id).or_default().push(*id);
            }
            Event::BookingCancelled { id, .. } => {
                if let Some(booking) = rs.remove_booking(*id) {
                    self.unindex_booking(&booking);
                }
            }
            Event::RoomUpdated {
                room_type,
                price_cents,
                description,
                photo_url,
                ..
            } => {
                rs.room_type = room_type.clone();
                rs.price_cents = *price_cents;
                rs.description = description.clone();
                rs.photo_url = photo_url.clone();
            }
            // Room creation/deletion and users are handled by apply_global
            _ => {}
        }
    }

    fn apply_global(&self, event: &Event) {
        match event {
            Event::RoomCreated {
                id,
                room_type,
                price_cents,
                description,
                photo_url,
            } => {
                let rs = RoomState::new(
                    *id,
                    room_type.clone(),
                    *price_cents,
                    description.clone(),
                    photo_url.clone(),
                );
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::RoomDeleted { id } => {
                // Only reached during replay; live deletes call drop_room under their own lock.
                if let Some(rs) = self.get_room_state(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    self.drop_room(&guard);
                }
            }
            Event::UserRegistered {
                id,
                email,
                name,
                phone_number,
                password_hash,
                role,
            } => {
                self.email_index.insert(email.clone(), *id);
                self.users.insert(
                    *id,
                    UserRecord {
                        id: *id,
                        email: email.clone(),
                        name: name.clone(),
                        phone_number: phone_number.clone(),
                        password_hash: password_hash.clone(),
                        role: *role,
                    },
                );
            }
            Event::UserDeleted { id } => {
                if let Some((_, user)) = self.users.remove(id) {
                    self.email_index.remove(&user.email);
                }
                self.user_bookings.remove(id);
            }
            _ => {}
        }
    }

    /// Remove a room and forget every booking it carried.
    pub(super) fn drop_room(&self, rs: &RoomState) {
        self.rooms.remove(&rs.id);
        for booking in &rs.bookings {
            self.unindex_booking(booking);
        }
    }

    fn unindex_booking(&self, booking: &BookingRecord) {
        self.booking_to_room.remove(&booking.id);
        self.code_index.remove(&booking.confirmation_code);
        if let Some(mut ids) = self.user_bookings.get_mut(&booking.user_id) {
            ids.retain(|b| *b != booking.id);
        }
    }
}

/// The room an event mutates in place, if any.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingConfirmed { room_id, .. } | Event::BookingCancelled { room_id, .. } => {
            Some(*room_id)
        }
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::UserRegistered { .. }
        | Event::UserDeleted { .. } => None,
    }
}
