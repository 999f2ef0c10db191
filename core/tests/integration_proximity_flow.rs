//! End-to-end flow through `ProximityCore` on a simulated radio medium

use proxtrace_core::{
    BackendIdentifierStore, ManualClock, ProximityCapabilities, ProximityConfig, ProximityCore,
    SessionState, SimulatedAir, SERVICE_UUID,
};
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_700_000_000_000;

fn device(air: &SimulatedAir, key: &str, clock: Arc<ManualClock>) -> ProximityCore {
    let capabilities =
        ProximityCapabilities::simulated(air, key, Arc::new(BackendIdentifierStore::memory()))
            .with_clock(clock);
    ProximityCore::new(ProximityConfig::default(), capabilities).expect("valid config")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_advertise_session_expires_after_budget() {
    let air = SimulatedAir::new();
    let core = device(&air, "alice", Arc::new(ManualClock::new(T0)));

    let identifier = core.current_identifier();
    assert!(identifier.id().starts_with("ble-"));

    core.start_advertising().unwrap();
    settle().await;
    assert_eq!(core.advertise_state(), SessionState::Active);
    assert_eq!(air.broadcaster_count(), 1);

    tokio::time::sleep(Duration::from_millis(30_000)).await;
    assert_eq!(core.advertise_state(), SessionState::Idle);
    assert_eq!(air.broadcaster_count(), 0);
    assert!(core.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_two_devices_detect_each_other() {
    let air = SimulatedAir::new();
    let clock = Arc::new(ManualClock::new(T0));
    let alice = device(&air, "alice", clock.clone());
    let bob = device(&air, "bob", clock.clone());

    for core in [&alice, &bob] {
        core.start_advertising().unwrap();
        core.start_scanning().unwrap();
    }
    settle().await;

    for step in 0..5 {
        air.sweep(|key| if key == "alice" { -60 - step } else { -70 });
        settle().await;
        clock.advance(1_000);
    }

    alice.stop_scanning();
    bob.stop_scanning();

    let seen_by_alice = alice.detected_devices();
    assert_eq!(seen_by_alice.len(), 1);
    assert_eq!(seen_by_alice[0].identifier.id(), bob.current_identifier().id());
    assert_eq!(seen_by_alice[0].average_rssi, -70);
    assert_eq!(seen_by_alice[0].first_seen, T0);
    assert_eq!(seen_by_alice[0].last_seen, T0 + 4_000);

    let seen_by_bob = bob.detected_devices();
    assert_eq!(seen_by_bob.len(), 1);
    assert_eq!(seen_by_bob[0].identifier.id(), alice.current_identifier().id());
    // -60..=-64 averages to -62
    assert_eq!(seen_by_bob[0].average_rssi, -62);

    let events = bob.proximity_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].local_user_id, bob.current_identifier().id());
    assert_eq!(events[0].remote_user_id, alice.current_identifier().id());
    assert_eq!(events[0].duration_ms, 4_000);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_is_visible_to_scanners() {
    let air = SimulatedAir::new();
    let clock = Arc::new(ManualClock::new(T0));
    let alice = device(&air, "alice", clock.clone());
    let bob = device(&air, "bob", clock.clone());

    alice.start_advertising().unwrap();
    settle().await;
    let old_id = alice.current_identifier();
    let new_id = alice.rotate_identifier().await;
    settle().await;
    assert_eq!(alice.advertise_state(), SessionState::Active);

    bob.start_scanning().unwrap();
    settle().await;
    air.sweep(|_| -55);
    settle().await;
    bob.stop_scanning();

    let detected: Vec<String> = bob
        .detected_devices()
        .iter()
        .map(|d| d.identifier.id().to_string())
        .collect();
    assert_eq!(detected, vec![new_id.id().to_string()]);
    assert_ne!(new_id.id(), old_id.id());
}

#[tokio::test(start_paused = true)]
async fn test_lazy_rotation_after_interval() {
    let air = SimulatedAir::new();
    let clock = Arc::new(ManualClock::new(T0));
    let core = device(&air, "alice", clock.clone());

    let first = core.current_identifier();
    clock.advance(15 * 60 * 1000);
    assert_eq!(core.current_identifier(), first);

    clock.advance(1);
    let second = core.current_identifier();
    assert_ne!(second.id(), first.id());
    assert_eq!(second.created_at(), T0 + 15 * 60 * 1000 + 1);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_beacon_is_ignored() {
    let air = SimulatedAir::new();
    air.add_beacon("short", SERVICE_UUID, vec![0xff, 0xff]);
    air.add_beacon("good", SERVICE_UUID, vec![0x12, 0x34, 0x56, 0x78]);
    let core = device(&air, "alice", Arc::new(ManualClock::new(T0)));

    core.start_scanning().unwrap();
    settle().await;
    air.sweep(|_| -80);
    settle().await;

    tokio::time::sleep(Duration::from_millis(30_000)).await;
    assert_eq!(core.scan_state(), SessionState::Idle);

    let detected = core.detected_devices();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].identifier.id(), "ble-12345678");
    assert!(core.last_error().is_none());
}
