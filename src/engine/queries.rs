use std::collections::BTreeSet;

use tokio::sync::OwnedRwLockReadGuard;
use ulid::Ulid;

use crate::model::*;

use super::availability::free_rooms;
use super::confirmation::ConfirmationCode;
use super::conflict::{normalize_email, validate_stay};
use super::{Engine, EngineError};

impl Engine {
    /// Read-lock every room. Guards are taken one at a time, never while
    /// holding a DashMap shard.
    async fn read_all_rooms(&self) -> Vec<OwnedRwLockReadGuard<RoomState>> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(arcs.len());
        for rs in arcs {
            guards.push(rs.read_owned().await);
        }
        guards
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// A room with its bookings, or `None`.
    pub async fn get_room(&self, id: &Ulid) -> Option<(RoomInfo, Vec<BookingInfo>)> {
        let rs = self.get_room_state(id)?;
        let guard = rs.read().await;
        let bookings = guard.bookings.iter().map(|b| guard.booking_info(b)).collect();
        Some((guard.info(), bookings))
    }

    /// All rooms, newest first.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .read_all_rooms()
            .await
            .iter()
            .map(|g| g.info())
            .collect();
        rooms.sort_by(|a, b| b.id.cmp(&a.id));
        rooms
    }

    /// Distinct room types, sorted.
    pub async fn room_types(&self) -> Vec<String> {
        let types: BTreeSet<String> = self
            .read_all_rooms()
            .await
            .iter()
            .map(|g| g.room_type.clone())
            .collect();
        types.into_iter().collect()
    }

    /// Rooms that would accept a booking for `[check_in, check_out)`.
    pub async fn available_rooms(
        &self,
        check_in: Date,
        check_out: Date,
        room_type: Option<&str>,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        let stay = Stay { check_in, check_out };
        validate_stay(&stay)?;
        let guards = self.read_all_rooms().await;
        let mut rooms = free_rooms(guards.iter().map(|g| &**g), &stay, room_type);
        rooms.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rooms)
    }

    /// Rooms with nobody staying the night of `date`.
    pub async fn rooms_free_on(&self, date: Date) -> Vec<RoomInfo> {
        let night = Stay::night_of(date);
        let mut rooms: Vec<RoomInfo> = self
            .read_all_rooms()
            .await
            .iter()
            .filter(|g| g.overlapping(&night).next().is_none())
            .map(|g| g.info())
            .collect();
        rooms.sort_by(|a, b| b.id.cmp(&a.id));
        rooms
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(&self, id: &Ulid) -> Option<BookingInfo> {
        let room_id = self.room_for_booking(id)?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == *id)
            .map(|b| guard.booking_info(b))
    }

    pub async fn find_booking_by_code(&self, code: &str) -> Result<BookingInfo, EngineError> {
        let code = ConfirmationCode::parse(code)?;
        let booking_id = self
            .code_index
            .get(code.as_str())
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::CodeNotFound(code.to_string()))?;
        self.get_booking(&booking_id)
            .await
            .ok_or_else(|| EngineError::CodeNotFound(code.into_string()))
    }

    /// Every booking in the property, newest first.
    pub async fn list_bookings(&self) -> Vec<BookingInfo> {
        let mut bookings: Vec<BookingInfo> = self
            .read_all_rooms()
            .await
            .iter()
            .flat_map(|g| g.bookings.iter().map(|b| g.booking_info(b)).collect::<Vec<_>>())
            .collect();
        bookings.sort_by(|a, b| b.id.cmp(&a.id));
        bookings
    }

    pub async fn room_bookings(&self, room_id: &Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        self.get_room(room_id)
            .await
            .map(|(_, bookings)| bookings)
            .ok_or(EngineError::NotFound(*room_id))
    }

    /// A user's booking history, in check-in order.
    pub async fn user_bookings(&self, user_id: &Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        if !self.users.contains_key(user_id) {
            return Err(EngineError::NotFound(*user_id));
        }
        let ids = self
            .user_bookings
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(b) = self.get_booking(&id).await {
                bookings.push(b);
            }
        }
        bookings.sort_by_key(|b| (b.check_in, b.id));
        Ok(bookings)
    }

    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: &Ulid) -> Option<UserInfo> {
        self.users.get(id).map(|u| u.info())
    }

    pub fn get_user_by_email(&self, email: &str) -> Option<UserInfo> {
        let id = self.email_index.get(&normalize_email(email)).map(|e| *e.value())?;
        self.get_user(&id)
    }

    /// All users, newest first.
    pub fn list_users(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self.users.iter().map(|e| e.value().info()).collect();
        users.sort_by(|a, b| b.id.cmp(&a.id));
        users
    }
}
