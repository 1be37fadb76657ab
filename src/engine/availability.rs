use crate::model::*;

// ── Admission rule ────────────────────────────────────────────────

/// Whether `proposed` collides with the already committed stay `existing`.
///
/// Stricter than half-open overlap: a shared check-in date always collides,
/// and a stay ending on the day an existing one begins collides too. A stay
/// starting on an existing check-out date is accepted.
///
/// Rules 6 and 7 only fire for zero-length or inverted stays, which
/// validation rejects upstream; they are kept so the predicate gives the
/// same answer for any input it is handed.
pub fn conflicts_with(proposed: &Stay, existing: &Stay) -> bool {
    let (p_in, p_out) = (proposed.check_in, proposed.check_out);
    let (e_in, e_out) = (existing.check_in, existing.check_out);

    // 1. same check-in date
    p_in == e_in
        // 2. leaves before the existing guest does, having reached their check-in
        || (p_out < e_out && p_out >= e_in)
        // 3. arrives while the existing guest is in
        || (e_in < p_in && p_in < e_out)
        // 4. arrives earlier, leaves together
        || (p_in < e_in && p_out == e_out)
        // 5. swallows the existing stay
        || (p_in < e_in && p_out > e_out)
        // 6. exact swap
        || (p_in == e_out && p_out == e_in)
        // 7. zero-length stay on the existing check-out date
        || (p_in == e_out && p_out == p_in)
}

/// True iff `proposed` conflicts with none of `existing`.
///
/// Pure: the caller validates `proposed` and passes the schedule of a single
/// room. Deciding and committing must happen under that room's write lock,
/// otherwise two overlapping requests can both see `true`.
pub fn is_available<'a, I>(proposed: &Stay, existing: I) -> bool
where
    I: IntoIterator<Item = &'a Stay>,
{
    !existing.into_iter().any(|e| conflicts_with(proposed, e))
}

/// First booking on the room that blocks `proposed`, if any.
pub fn first_conflict<'a>(rs: &'a RoomState, proposed: &Stay) -> Option<&'a BookingRecord> {
    rs.bookings.iter().find(|b| conflicts_with(proposed, &b.stay))
}

/// Rooms (optionally of one type) that would admit `stay`.
pub fn free_rooms<'a, I>(rooms: I, stay: &Stay, room_type: Option<&str>) -> Vec<RoomInfo>
where
    I: IntoIterator<Item = &'a RoomState>,
{
    rooms
        .into_iter()
        .filter(|rs| room_type.is_none_or(|t| rs.room_type.eq_ignore_ascii_case(t)))
        .filter(|rs| is_available(stay, rs.stays()))
        .map(RoomState::info)
        .collect()
}
