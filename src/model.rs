use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date, the only time type. Stays are counted in nights.
pub type Date = NaiveDate;

/// Half-open stay `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: Date,
    pub check_out: Date,
}

impl Stay {
    pub fn new(check_in: Date, check_out: Date) -> Self {
        debug_assert!(check_in < check_out, "check-in must be before check-out");
        Self { check_in, check_out }
    }

    /// The single night starting on `date`.
    pub fn night_of(date: Date) -> Self {
        Self {
            check_in: date,
            check_out: date.checked_add_days(Days::new(1)).unwrap_or(date),
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Plain half-open overlap. Booking admission uses the stricter rule set
    /// in `engine::availability`; this is only for index scans.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_date(&self, date: Date) -> bool {
        self.check_in <= date && date < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A committed booking as stored on its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub user_id: Ulid,
    pub stay: Stay,
    pub adults: u32,
    pub children: u32,
    pub confirmation_code: String,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub room_type: String,
    pub price_cents: i64,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    /// Committed bookings, sorted by `stay.check_in`.
    pub bookings: Vec<BookingRecord>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        room_type: String,
        price_cents: i64,
        description: Option<String>,
        photo_url: Option<String>,
    ) -> Self {
        Self {
            id,
            room_type,
            price_cents,
            description,
            photo_url,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: BookingRecord) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.check_in, |b| b.stay.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<BookingRecord> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Snapshot of the room's schedule.
    pub fn stays(&self) -> impl Iterator<Item = &Stay> {
        self.bookings.iter().map(|b| &b.stay)
    }

    /// Bookings whose stay overlaps the query window.
    /// Binary search skips bookings checking in on or after `query.check_out`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &BookingRecord> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < query.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.check_out > query.check_in)
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            room_type: self.room_type.clone(),
            price_cents: self.price_cents,
            description: self.description.clone(),
            photo_url: self.photo_url.clone(),
        }
    }

    pub fn booking_info(&self, booking: &BookingRecord) -> BookingInfo {
        BookingInfo {
            id: booking.id,
            room_id: self.id,
            user_id: booking.user_id,
            check_in: booking.stay.check_in,
            check_out: booking.stay.check_out,
            adults: booking.adults,
            children: booking.children,
            confirmation_code: booking.confirmation_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub phone_number: Option<String>,
    /// `<salt hex>$<sha256 hex>`
    pub password_hash: String,
    pub role: Role,
}

impl UserRecord {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            phone_number: self.phone_number.clone(),
            role: self.role,
        }
    }
}

/// Partial room update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub room_type: Option<String>,
    pub price_cents: Option<i64>,
    pub description: Option<String>,
    pub photo_url: Option<String>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.room_type.is_none()
            && self.price_cents.is_none()
            && self.description.is_none()
            && self.photo_url.is_none()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        room_type: String,
        price_cents: i64,
        description: Option<String>,
        photo_url: Option<String>,
    },
    RoomUpdated {
        id: Ulid,
        room_type: String,
        price_cents: i64,
        description: Option<String>,
        photo_url: Option<String>,
    },
    RoomDeleted {
        id: Ulid,
    },
    UserRegistered {
        id: Ulid,
        email: String,
        name: String,
        phone_number: Option<String>,
        password_hash: String,
        role: Role,
    },
    UserDeleted {
        id: Ulid,
    },
    BookingConfirmed {
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        stay: Stay,
        adults: u32,
        children: u32,
        confirmation_code: String,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_type: String,
    pub price_cents: i64,
    pub description: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub check_in: Date,
    pub check_out: Date,
    pub adults: u32,
    pub children: u32,
    pub confirmation_code: String,
}

impl BookingInfo {
    pub fn total_guests(&self) -> u32 {
        self.adults + self.children
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub role: Role,
}
