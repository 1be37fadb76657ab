use super::*;
use crate::limits::*;

fn d(s: &str) -> Date {
    s.parse().unwrap()
}

fn stay(check_in: &str, check_out: &str) -> Stay {
    Stay::new(d(check_in), d(check_out))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("staybook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = Engine::new(path.clone(), CodeGenerator::seeded(7)).unwrap();
    (engine, path)
}

async fn add_room(engine: &Engine, room_type: &str, price_cents: i64) -> Ulid {
    let id = Ulid::new();
    engine
        .create_room(id, room_type.into(), price_cents, None, None)
        .await
        .unwrap();
    id
}

async fn add_user(engine: &Engine, email: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .register_user(id, email, "Guest".into(), None, "hunter2", Role::User)
        .await
        .unwrap();
    id
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_room() {
    let (engine, _) = new_engine("create_room.wal");
    let id = Ulid::new();
    engine
        .create_room(
            id,
            "Double".into(),
            15_000,
            Some("Sea view".into()),
            Some("https://img.example/1.jpg".into()),
        )
        .await
        .unwrap();

    let (room, bookings) = engine.get_room(&id).await.unwrap();
    assert_eq!(room.room_type, "Double");
    assert_eq!(room.price_cents, 15_000);
    assert_eq!(room.description.as_deref(), Some("Sea view"));
    assert!(bookings.is_empty());
}

#[tokio::test]
async fn duplicate_room_rejected() {
    let (engine, _) = new_engine("dup_room.wal");
    let id = add_room(&engine, "Single", 9_000).await;
    let result = engine.create_room(id, "Single".into(), 9_000, None, None).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn room_fields_validated() {
    let (engine, _) = new_engine("room_fields.wal");
    let blank = engine.create_room(Ulid::new(), "  ".into(), 100, None, None).await;
    assert!(matches!(blank, Err(EngineError::InvalidArgument(_))));
    let negative = engine.create_room(Ulid::new(), "Suite".into(), -1, None, None).await;
    assert!(matches!(negative, Err(EngineError::InvalidArgument(_))));
    let long = engine
        .create_room(Ulid::new(), "x".repeat(MAX_TEXT_LEN + 1), 100, None, None)
        .await;
    assert!(matches!(long, Err(EngineError::LimitExceeded(_))));
    assert_eq!(engine.room_count(), 0);
}

#[tokio::test]
async fn update_room_patches_fields() {
    let (engine, _) = new_engine("update_room.wal");
    let id = add_room(&engine, "Single", 9_000).await;

    let updated = engine
        .update_room(
            id,
            RoomPatch {
                price_cents: Some(11_000),
                description: Some("Renovated".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.room_type, "Single");
    assert_eq!(updated.price_cents, 11_000);
    assert_eq!(updated.description.as_deref(), Some("Renovated"));

    let missing = engine.update_room(Ulid::new(), RoomPatch::default()).await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn list_rooms_newest_first_and_types_distinct() {
    let (engine, _) = new_engine("list_rooms.wal");
    let a = add_room(&engine, "Single", 9_000).await;
    let b = add_room(&engine, "Double", 12_000).await;
    let c = add_room(&engine, "Single", 9_500).await;

    let ids: Vec<Ulid> = engine.list_rooms().await.iter().map(|r| r.id).collect();
    let mut expected = vec![a, b, c];
    expected.sort_by(|x, y| y.cmp(x));
    assert_eq!(ids, expected);

    assert_eq!(engine.room_types().await, vec!["Double".to_string(), "Single".to_string()]);
}

#[tokio::test]
async fn delete_room_drops_its_bookings() {
    let (engine, _) = new_engine("delete_room.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "a@example.com").await;
    let booking = Ulid::new();
    let info = engine
        .confirm_booking(booking, room, user, stay("2024-03-01", "2024-03-04"), 1, 0)
        .await
        .unwrap();

    engine.delete_room(room).await.unwrap();

    assert!(engine.get_room(&room).await.is_none());
    assert!(engine.get_booking(&booking).await.is_none());
    assert!(matches!(
        engine.find_booking_by_code(&info.confirmation_code).await,
        Err(EngineError::CodeNotFound(_))
    ));
    assert!(engine.user_bookings(&user).await.unwrap().is_empty());
    assert!(matches!(engine.delete_room(room).await, Err(EngineError::NotFound(_))));
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn register_and_login() {
    let (engine, _) = new_engine("login.wal");
    let id = Ulid::new();
    let user = engine
        .register_user(
            id,
            " Ann@Example.com ",
            "Ann".into(),
            Some("+1 555 0100".into()),
            "s3cret",
            Role::Admin,
        )
        .await
        .unwrap();
    assert_eq!(user.email, "ann@example.com");
    assert_eq!(user.role, Role::Admin);

    let logged_in = engine.login("ANN@example.com", "s3cret").unwrap();
    assert_eq!(logged_in.id, id);

    assert!(matches!(
        engine.login("ann@example.com", "wrong"),
        Err(EngineError::InvalidCredentials)
    ));
    assert!(matches!(
        engine.login("nobody@example.com", "s3cret"),
        Err(EngineError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn email_must_be_unique() {
    let (engine, _) = new_engine("email_unique.wal");
    add_user(&engine, "dup@example.com").await;
    let result = engine
        .register_user(Ulid::new(), "DUP@example.com", "Other".into(), None, "pw", Role::User)
        .await;
    assert!(matches!(result, Err(EngineError::EmailTaken(_))));
    assert_eq!(engine.list_users().len(), 1);
}

#[tokio::test]
async fn password_is_not_stored_in_clear() {
    let (engine, _) = new_engine("password_hash.wal");
    let id = add_user(&engine, "hash@example.com").await;
    let stored = engine.users.get(&id).unwrap().password_hash.clone();
    assert!(!stored.contains("hunter2"));
    assert!(stored.contains('$'));
}

#[tokio::test]
async fn get_user_by_email_normalizes() {
    let (engine, _) = new_engine("user_by_email.wal");
    let id = add_user(&engine, "find@example.com").await;
    assert_eq!(engine.get_user_by_email("FIND@example.com").unwrap().id, id);
    assert!(engine.get_user_by_email("other@example.com").is_none());
}

#[tokio::test]
async fn delete_user_cancels_bookings() {
    let (engine, _) = new_engine("delete_user.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "leaving@example.com").await;
    engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-05-01", "2024-05-03"), 1, 0)
        .await
        .unwrap();
    engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-06-01", "2024-06-03"), 2, 1)
        .await
        .unwrap();

    assert_eq!(engine.delete_user(user).await.unwrap(), 2);
    assert!(engine.get_user(&user).is_none());
    assert!(engine.room_bookings(&room).await.unwrap().is_empty());
    // Email is free again.
    add_user(&engine, "leaving@example.com").await;
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle() {
    let (engine, _) = new_engine("booking_lifecycle.wal");
    let room = add_room(&engine, "Double", 12_000).await;
    let user = add_user(&engine, "guest@example.com").await;

    let id = Ulid::new();
    let info = engine
        .confirm_booking(id, room, user, stay("2024-03-01", "2024-03-05"), 2, 1)
        .await
        .unwrap();
    assert_eq!(info.id, id);
    assert_eq!(info.room_id, room);
    assert_eq!(info.nights(), 4);
    assert_eq!(info.total_guests(), 3);
    assert_eq!(info.confirmation_code.len(), CONFIRMATION_CODE_LEN);
    assert!(info.confirmation_code.bytes().all(|b| b.is_ascii_alphanumeric()));

    let by_code = engine.find_booking_by_code(&info.confirmation_code).await.unwrap();
    assert_eq!(by_code, info);
    assert_eq!(engine.get_booking(&id).await.unwrap(), info);
    assert_eq!(engine.user_bookings(&user).await.unwrap(), vec![info.clone()]);
    assert_eq!(engine.list_bookings().await.len(), 1);

    assert_eq!(engine.cancel_booking(id).await.unwrap(), room);
    assert!(engine.get_booking(&id).await.is_none());
    assert!(matches!(
        engine.find_booking_by_code(&info.confirmation_code).await,
        Err(EngineError::CodeNotFound(_))
    ));
    assert!(matches!(engine.cancel_booking(id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn overlapping_booking_conflicts() {
    let (engine, _) = new_engine("overlap_conflict.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "o@example.com").await;
    let first = Ulid::new();
    engine
        .confirm_booking(first, room, user, stay("2024-03-05", "2024-03-10"), 1, 0)
        .await
        .unwrap();

    let inside = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-03-06", "2024-03-08"), 1, 0)
        .await;
    assert!(matches!(inside, Err(EngineError::Conflict(id)) if id == first));

    let enclosing = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-03-01", "2024-03-15"), 1, 0)
        .await;
    assert!(matches!(enclosing, Err(EngineError::Conflict(_))));

    // Check-in on the day the existing guest leaves is fine.
    engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-03-10", "2024-03-12"), 1, 0)
        .await
        .unwrap();
    // Disjoint stays on both sides are fine.
    engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-01-01", "2024-01-05"), 1, 0)
        .await
        .unwrap();
    assert_eq!(engine.room_bookings(&room).await.unwrap().len(), 3);
}

#[tokio::test]
async fn other_rooms_are_independent() {
    let (engine, _) = new_engine("independent_rooms.wal");
    let a = add_room(&engine, "Single", 9_000).await;
    let b = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "i@example.com").await;
    let s = stay("2024-04-01", "2024-04-03");
    engine.confirm_booking(Ulid::new(), a, user, s, 1, 0).await.unwrap();
    engine.confirm_booking(Ulid::new(), b, user, s, 1, 0).await.unwrap();
}

#[tokio::test]
async fn cancelled_dates_can_be_rebooked() {
    let (engine, _) = new_engine("rebook.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "r@example.com").await;
    let s = stay("2024-07-01", "2024-07-08");
    let id = Ulid::new();
    engine.confirm_booking(id, room, user, s, 1, 0).await.unwrap();
    engine.cancel_booking(id).await.unwrap();
    engine.confirm_booking(Ulid::new(), room, user, s, 1, 0).await.unwrap();
}

#[tokio::test]
async fn booking_arguments_validated() {
    let (engine, _) = new_engine("booking_args.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "v@example.com").await;

    let inverted = Stay {
        check_in: d("2024-03-05"),
        check_out: d("2024-03-01"),
    };
    let result = engine.confirm_booking(Ulid::new(), room, user, inverted, 1, 0).await;
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

    let no_adults = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-03-01", "2024-03-02"), 0, 2)
        .await;
    assert!(matches!(no_adults, Err(EngineError::InvalidArgument(_))));

    let no_room = engine
        .confirm_booking(Ulid::new(), Ulid::new(), user, stay("2024-03-01", "2024-03-02"), 1, 0)
        .await;
    assert!(matches!(no_room, Err(EngineError::NotFound(_))));

    let no_user = engine
        .confirm_booking(Ulid::new(), room, Ulid::new(), stay("2024-03-01", "2024-03-02"), 1, 0)
        .await;
    assert!(matches!(no_user, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let (engine, _) = new_engine("dup_booking.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "dup@example.com").await;
    let id = Ulid::new();
    engine
        .confirm_booking(id, room, user, stay("2024-03-01", "2024-03-02"), 1, 0)
        .await
        .unwrap();
    let again = engine
        .confirm_booking(id, room, user, stay("2024-04-01", "2024-04-02"), 1, 0)
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn confirmation_codes_are_unique() {
    let (engine, _) = new_engine("unique_codes.wal");
    let user = add_user(&engine, "codes@example.com").await;
    let mut codes = std::collections::HashSet::new();
    for _ in 0..50 {
        let room = add_room(&engine, "Single", 9_000).await;
        let info = engine
            .confirm_booking(Ulid::new(), room, user, stay("2024-03-01", "2024-03-02"), 1, 0)
            .await
            .unwrap();
        assert!(codes.insert(info.confirmation_code));
    }
}

#[tokio::test]
async fn code_lookup_rejects_malformed_codes() {
    let (engine, _) = new_engine("code_malformed.wal");
    assert!(matches!(
        engine.find_booking_by_code("no-such-code").await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.find_booking_by_code("ABCDEFGHIJ").await,
        Err(EngineError::CodeNotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_overlapping_bookings_admit_exactly_one() {
    let path = test_wal_path("race.wal");
    let engine = Arc::new(Engine::new(path, CodeGenerator::from_entropy()).unwrap());
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "race@example.com").await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let eng = engine.clone();
        // Every stay covers the night of 2024-08-10.
        let check_in = d("2024-08-01") + chrono::Days::new(i % 8);
        let s = Stay::new(check_in, d("2024-08-11"));
        handles.push(tokio::spawn(async move {
            eng.confirm_booking(Ulid::new(), room, user, s, 1, 0).await
        }));
    }

    let mut confirmed = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(confirmed, 1);
    assert_eq!(engine.room_bookings(&room).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_booking_id_on_two_rooms_admits_one() {
    let path = test_wal_path("id_race.wal");
    let engine = Arc::new(Engine::new(path, CodeGenerator::from_entropy()).unwrap());
    let user = add_user(&engine, "idrace@example.com").await;

    for round in 0..50u64 {
        let r1 = add_room(&engine, "Single", 9_000).await;
        let r2 = add_room(&engine, "Single", 9_000).await;
        let id = Ulid::new();
        let check_in = d("2025-01-01") + chrono::Days::new(round * 3);
        let s = Stay::new(check_in, check_in + chrono::Days::new(2));

        let handles: Vec<_> = [r1, r2]
            .into_iter()
            .map(|room| {
                let eng = engine.clone();
                tokio::spawn(async move { eng.confirm_booking(id, room, user, s, 1, 0).await })
            })
            .collect();

        let mut confirmed = Vec::new();
        for h in handles {
            match h.await.unwrap() {
                Ok(b) => confirmed.push(b.room_id),
                Err(EngineError::AlreadyExists(dup)) => assert_eq!(dup, id),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(confirmed.len(), 1, "round {round}");

        let winner = confirmed[0];
        let loser = if winner == r1 { r2 } else { r1 };
        assert_eq!(engine.room_for_booking(&id), Some(winner));
        assert!(engine.room_bookings(&loser).await.unwrap().is_empty());

        // The booking stays reachable by id and can be cancelled.
        assert_eq!(engine.cancel_booking(id).await.unwrap(), winner);
    }
}

#[tokio::test]
async fn rejected_booking_releases_its_id() {
    let (engine, _) = new_engine("release_id.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let other = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "release@example.com").await;
    engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-05-01", "2024-05-04"), 1, 0)
        .await
        .unwrap();

    let id = Ulid::new();
    assert!(matches!(
        engine
            .confirm_booking(id, room, user, stay("2024-05-02", "2024-05-03"), 1, 0)
            .await,
        Err(EngineError::Conflict(_))
    ));
    assert_eq!(engine.room_for_booking(&id), None);

    let booked = engine
        .confirm_booking(id, other, user, stay("2024-05-02", "2024-05-03"), 1, 0)
        .await
        .unwrap();
    assert_eq!(booked.room_id, other);
}

// ── Search ───────────────────────────────────────────────

#[tokio::test]
async fn available_rooms_filters_booked_and_type() {
    let (engine, _) = new_engine("available.wal");
    let single = add_room(&engine, "Single", 9_000).await;
    let double = add_room(&engine, "Double", 12_000).await;
    let user = add_user(&engine, "s@example.com").await;
    engine
        .confirm_booking(Ulid::new(), single, user, stay("2024-03-05", "2024-03-10"), 1, 0)
        .await
        .unwrap();

    let free = engine
        .available_rooms(d("2024-03-06"), d("2024-03-08"), None)
        .await
        .unwrap();
    assert_eq!(free.iter().map(|r| r.id).collect::<Vec<_>>(), vec![double]);

    let later = engine
        .available_rooms(d("2024-03-10"), d("2024-03-12"), Some("single"))
        .await
        .unwrap();
    assert_eq!(later.iter().map(|r| r.id).collect::<Vec<_>>(), vec![single]);

    let invalid = engine.available_rooms(d("2024-03-10"), d("2024-03-10"), None).await;
    assert!(matches!(invalid, Err(EngineError::InvalidArgument(_))));
}

#[tokio::test]
async fn rooms_free_on_a_date() {
    let (engine, _) = new_engine("free_on.wal");
    let a = add_room(&engine, "Single", 9_000).await;
    let b = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "f@example.com").await;
    engine
        .confirm_booking(Ulid::new(), a, user, stay("2024-03-05", "2024-03-10"), 1, 0)
        .await
        .unwrap();

    let free: Vec<Ulid> = engine.rooms_free_on(d("2024-03-07")).await.iter().map(|r| r.id).collect();
    assert_eq!(free, vec![b]);
    // Check-out day: the night is free.
    assert_eq!(engine.rooms_free_on(d("2024-03-10")).await.len(), 2);
}

#[tokio::test]
async fn user_bookings_in_check_in_order() {
    let (engine, _) = new_engine("history.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "h@example.com").await;
    for (i, o) in [("2024-09-01", "2024-09-02"), ("2024-02-01", "2024-02-02"), ("2024-05-01", "2024-05-02")] {
        engine
            .confirm_booking(Ulid::new(), room, user, stay(i, o), 1, 0)
            .await
            .unwrap();
    }
    let check_ins: Vec<Date> = engine
        .user_bookings(&user)
        .await
        .unwrap()
        .iter()
        .map(|b| b.check_in)
        .collect();
    assert_eq!(check_ins, vec![d("2024-02-01"), d("2024-05-01"), d("2024-09-01")]);
    assert!(matches!(
        engine.user_bookings(&Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── WAL replay and compaction ────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("replay.wal");
    let room = Ulid::new();
    let user = Ulid::new();
    let kept = Ulid::new();
    let code;

    {
        let engine = Engine::new(path.clone(), CodeGenerator::seeded(1)).unwrap();
        engine.create_room(room, "Suite".into(), 30_000, None, None).await.unwrap();
        engine
            .register_user(user, "replay@example.com", "Rae".into(), None, "pw", Role::User)
            .await
            .unwrap();
        code = engine
            .confirm_booking(kept, room, user, stay("2024-03-01", "2024-03-04"), 2, 0)
            .await
            .unwrap()
            .confirmation_code;
        let gone = Ulid::new();
        engine
            .confirm_booking(gone, room, user, stay("2024-04-01", "2024-04-04"), 1, 0)
            .await
            .unwrap();
        engine.cancel_booking(gone).await.unwrap();
        engine
            .update_room(room, RoomPatch { price_cents: Some(32_000), ..Default::default() })
            .await
            .unwrap();
    }

    let engine = Engine::new(path, CodeGenerator::seeded(2)).unwrap();
    let (info, bookings) = engine.get_room(&room).await.unwrap();
    assert_eq!(info.price_cents, 32_000);
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, kept);
    assert_eq!(engine.find_booking_by_code(&code).await.unwrap().id, kept);
    assert_eq!(engine.login("replay@example.com", "pw").unwrap().id, user);

    // Rebuilt indexes still enforce conflicts.
    let clash = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-03-02", "2024-03-03"), 1, 0)
        .await;
    assert!(matches!(clash, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn replay_applies_deletes() {
    let path = test_wal_path("replay_deletes.wal");
    let room = Ulid::new();
    let user = Ulid::new();
    {
        let engine = Engine::new(path.clone(), CodeGenerator::seeded(3)).unwrap();
        engine.create_room(room, "Single".into(), 9_000, None, None).await.unwrap();
        engine
            .register_user(user, "gone@example.com", "G".into(), None, "pw", Role::User)
            .await
            .unwrap();
        engine
            .confirm_booking(Ulid::new(), room, user, stay("2024-03-01", "2024-03-02"), 1, 0)
            .await
            .unwrap();
        engine.delete_room(room).await.unwrap();
        engine.delete_user(user).await.unwrap();
    }

    let engine = Engine::new(path, CodeGenerator::seeded(4)).unwrap();
    assert_eq!(engine.room_count(), 0);
    assert!(engine.list_users().is_empty());
    assert!(engine.list_bookings().await.is_empty());
    assert!(engine.get_user_by_email("gone@example.com").is_none());
}

#[tokio::test]
async fn compact_wal_preserves_state() {
    let (engine, path) = new_engine("compact_state.wal");
    let room = add_room(&engine, "Double", 12_000).await;
    let user = add_user(&engine, "c@example.com").await;

    for _ in 0..20 {
        let tmp = Ulid::new();
        engine
            .confirm_booking(tmp, room, user, stay("2024-03-01", "2024-03-02"), 1, 0)
            .await
            .unwrap();
        engine.cancel_booking(tmp).await.unwrap();
    }
    let kept = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-06-01", "2024-06-05"), 2, 0)
        .await
        .unwrap();

    let size_before = std::fs::metadata(&path).unwrap().len();
    engine.compact_wal().await.unwrap();
    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(size_after < size_before, "compacted WAL ({size_after}) should be smaller than original ({size_before})");

    assert_eq!(engine.list_bookings().await, vec![kept.clone()]);

    drop(engine);
    let engine = Engine::new(path, CodeGenerator::seeded(9)).unwrap();
    assert_eq!(engine.list_bookings().await, vec![kept.clone()]);
    assert_eq!(
        engine.find_booking_by_code(&kept.confirmation_code).await.unwrap().id,
        kept.id
    );
    assert_eq!(engine.login("c@example.com", "hunter2").unwrap().id, user);
}

#[tokio::test]
async fn compact_then_append_survives_restart() {
    let path = test_wal_path("compact_append.wal");
    let room = Ulid::new();
    let user = Ulid::new();
    {
        let engine = Engine::new(path.clone(), CodeGenerator::seeded(5)).unwrap();
        engine.create_room(room, "Single".into(), 9_000, None, None).await.unwrap();
        engine
            .register_user(user, "late@example.com", "L".into(), None, "pw", Role::User)
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        engine
            .confirm_booking(Ulid::new(), room, user, stay("2024-03-01", "2024-03-02"), 1, 0)
            .await
            .unwrap();
    }

    let engine = Engine::new(path, CodeGenerator::seeded(6)).unwrap();
    assert_eq!(engine.room_bookings(&room).await.unwrap().len(), 1);
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit.wal");
    let engine = Arc::new(Engine::new(path.clone(), CodeGenerator::seeded(8)).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_room(Ulid::new(), format!("Type {i}"), 1_000, None, None).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.room_count(), n);

    let engine2 = Engine::new(path, CodeGenerator::seeded(8)).unwrap();
    assert_eq!(engine2.room_count(), n);
}

#[tokio::test]
async fn compact_resets_append_counter() {
    let (engine, _) = new_engine("compact_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    add_room(&engine, "Single", 9_000).await;
    add_user(&engine, "n@example.com").await;
    assert_eq!(engine.wal_appends_since_compact().await, 2);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn stay_length_limited() {
    let (engine, _) = new_engine("limit_stay.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "long@example.com").await;
    let result = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-01-01", "2025-06-01"), 1, 0)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded("stay too long"))));
}

#[tokio::test]
async fn guest_count_limited() {
    let (engine, _) = new_engine("limit_guests.wal");
    let room = add_room(&engine, "Single", 9_000).await;
    let user = add_user(&engine, "crowd@example.com").await;
    let result = engine
        .confirm_booking(Ulid::new(), room, user, stay("2024-01-01", "2024-01-02"), MAX_GUESTS, 1)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded("too many guests"))));
}
