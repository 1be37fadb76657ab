use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, hash_password, normalize_email, validate_guests, validate_stay,
    validate_text, verify_password,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        room_type: String,
        price_cents: i64,
        description: Option<String>,
        photo_url: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        if self.rooms.len() >= MAX_ROOMS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        validate_room_fields(&room_type, price_cents, description.as_deref(), photo_url.as_deref())?;
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            room_type,
            price_cents,
            description,
            photo_url,
        };
        self.persist_and_apply_global(&event).await?;
        info!("room {id} created");
        Ok(())
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<RoomInfo, EngineError> {
        let _gate = self.gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if patch.is_empty() {
            return Ok(guard.info());
        }

        let room_type = patch.room_type.unwrap_or_else(|| guard.room_type.clone());
        let price_cents = patch.price_cents.unwrap_or(guard.price_cents);
        let description = patch.description.or_else(|| guard.description.clone());
        let photo_url = patch.photo_url.or_else(|| guard.photo_url.clone());
        validate_room_fields(&room_type, price_cents, description.as_deref(), photo_url.as_deref())?;

        let event = Event::RoomUpdated {
            id,
            room_type,
            price_cents,
            description,
            photo_url,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Delete a room together with its bookings.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if !self.rooms.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        let dropped = guard.bookings.len();
        self.drop_room(&guard);
        info!("room {id} deleted with {dropped} bookings");
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(
        &self,
        id: Ulid,
        email: &str,
        name: String,
        phone_number: Option<String>,
        password: &str,
        role: Role,
    ) -> Result<UserInfo, EngineError> {
        let _gate = self.gate.read().await;
        if self.users.len() >= MAX_USERS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::InvalidArgument("email is required"));
        }
        if password.is_empty() {
            return Err(EngineError::InvalidArgument("password is required"));
        }
        if name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("name is required"));
        }
        validate_text(&email, MAX_TEXT_LEN, "email too long")?;
        validate_text(&name, MAX_TEXT_LEN, "name too long")?;
        validate_text(password, MAX_TEXT_LEN, "password too long")?;
        if let Some(phone) = &phone_number {
            validate_text(phone, MAX_TEXT_LEN, "phone number too long")?;
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // Reserve the email before the WAL round-trip so concurrent sign-ups can't both pass.
        match self.email_index.entry(email.clone()) {
            Entry::Occupied(_) => return Err(EngineError::EmailTaken(email)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let mut salt = [0u8; 16];
        self.codes.fill_bytes(&mut salt);
        let event = Event::UserRegistered {
            id,
            email: email.clone(),
            name,
            phone_number,
            password_hash: hash_password(&salt, password),
            role,
        };
        if let Err(e) = self.persist_and_apply_global(&event).await {
            self.email_index.remove(&email);
            return Err(e);
        }
        info!("user {id} registered");
        self.get_user(&id).ok_or(EngineError::NotFound(id))
    }

    /// Check credentials. Token issuance is left to the caller.
    pub fn login(&self, email: &str, password: &str) -> Result<UserInfo, EngineError> {
        let email = normalize_email(email);
        let user_id = self
            .email_index
            .get(&email)
            .map(|e| *e.value())
            .ok_or(EngineError::InvalidCredentials)?;
        let user = self.users.get(&user_id).ok_or(EngineError::InvalidCredentials)?;
        if !verify_password(&user.password_hash, password) {
            debug!("failed login for {email}");
            return Err(EngineError::InvalidCredentials);
        }
        Ok(user.info())
    }

    /// Delete a user, cancelling their bookings first. Returns how many were cancelled.
    pub async fn delete_user(&self, id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.gate.write().await;
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let booking_ids = self
            .user_bookings
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut cancelled = 0;
        for booking_id in booking_ids {
            match self.cancel_locked(booking_id).await {
                Ok(_) => cancelled += 1,
                // Room deleted in the meantime.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.persist_and_apply_global(&Event::UserDeleted { id }).await?;
        info!("user {id} deleted, {cancelled} bookings cancelled");
        Ok(cancelled)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Admit a stay on a room and issue its confirmation code.
    ///
    /// The availability check, code generation and WAL append all happen under
    /// the room's write lock: at most one booking decision per room at a time.
    pub async fn confirm_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        stay: Stay,
        adults: u32,
        children: u32,
    ) -> Result<BookingInfo, EngineError> {
        validate_stay(&stay)?;
        validate_guests(adults, children)?;

        let _gate = self.gate.read().await;
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::NotFound(user_id));
        }
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }

        // Claim the id across all rooms before deciding; released on any failure.
        match self.booking_to_room.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
            }
        }

        let admitted = self
            .admit_locked(&mut guard, id, room_id, user_id, stay, adults, children)
            .await;
        if admitted.is_err() {
            self.booking_to_room.remove(&id);
        }
        admitted
    }

    /// Conflict check, code issue and WAL append for a booking whose id is
    /// already claimed, with the room's write lock held.
    async fn admit_locked(
        &self,
        guard: &mut RoomState,
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        stay: Stay,
        adults: u32,
        children: u32,
    ) -> Result<BookingInfo, EngineError> {
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        if let Err(e) = check_no_conflict(guard, &stay) {
            debug!("booking {id} rejected on room {room_id}: {e}");
            metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "conflict")
                .increment(1);
            return Err(e);
        }

        let code = self.reserve_code(id)?;
        let event = Event::BookingConfirmed {
            id,
            room_id,
            user_id,
            stay,
            adults,
            children,
            confirmation_code: code.clone(),
        };
        if let Err(e) = self.persist_and_apply(guard, &event).await {
            self.code_index.remove(&code);
            return Err(e);
        }

        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "confirmed")
            .increment(1);
        info!(
            "booking {id} confirmed on room {room_id} for {} nights, code {code}",
            stay.nights()
        );
        let record = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .ok_or(EngineError::NotFound(id))?;
        Ok(guard.booking_info(record))
    }

    /// Draw codes until one is not yet taken, and claim it for `booking_id`.
    fn reserve_code(&self, booking_id: Ulid) -> Result<String, EngineError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = self.codes.generate(CONFIRMATION_CODE_LEN)?.into_string();
            match self.code_index.entry(code.clone()) {
                Entry::Occupied(_) => {
                    debug!("confirmation code collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    slot.insert(booking_id);
                    return Ok(code);
                }
            }
        }
        Err(EngineError::LimitExceeded("could not issue a unique confirmation code"))
    }

    /// Cancel a booking, freeing its dates. Returns the room it was on.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.gate.read().await;
        self.cancel_locked(id).await
    }

    /// Cancel with the gate already held by the caller.
    async fn cancel_locked(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        if !guard.bookings.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingCancelled { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "cancelled")
            .increment(1);
        info!("booking {id} cancelled on room {room_id}");
        Ok(room_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Mutations are held off until the compacted file has replaced the log, so
    /// nothing applied after the snapshot can be lost in the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();

        // Users first: bookings reference them.
        for entry in self.users.iter() {
            let user = entry.value();
            events.push(Event::UserRegistered {
                id: user.id,
                email: user.email.clone(),
                name: user.name.clone(),
                phone_number: user.phone_number.clone(),
                password_hash: user.password_hash.clone(),
                role: user.role,
            });
        }

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                room_type: guard.room_type.clone(),
                price_cents: guard.price_cents,
                description: guard.description.clone(),
                photo_url: guard.photo_url.clone(),
            });
            for b in &guard.bookings {
                events.push(Event::BookingConfirmed {
                    id: b.id,
                    room_id: guard.id,
                    user_id: b.user_id,
                    stay: b.stay,
                    adults: b.adults,
                    children: b.children,
                    confirmation_code: b.confirmation_code.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted: {} users, {} rooms", self.users.len(), self.rooms.len());
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_room_fields(
    room_type: &str,
    price_cents: i64,
    description: Option<&str>,
    photo_url: Option<&str>,
) -> Result<(), EngineError> {
    if room_type.trim().is_empty() {
        return Err(EngineError::InvalidArgument("room type is required"));
    }
    if price_cents < 0 {
        return Err(EngineError::InvalidArgument("room price must not be negative"));
    }
    validate_text(room_type, MAX_TEXT_LEN, "room type too long")?;
    if let Some(d) = description {
        validate_text(d, MAX_DESCRIPTION_LEN, "room description too long")?;
    }
    if let Some(u) = photo_url {
        validate_text(u, MAX_TEXT_LEN, "photo url too long")?;
    }
    Ok(())
}
