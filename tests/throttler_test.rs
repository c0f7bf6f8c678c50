use spigot::throttle::{Throttler, WriteOutcome};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Budget allocation
// ---------------------------------------------------------------------------

#[test]
fn shared_fair_split() {
    let throttler = Throttler::new(50, true);
    throttler.register("A");
    throttler.register("B");
    throttler.set_connection_limit(20, "C");

    assert_eq!(throttler.limit_for("A"), 15);
    assert_eq!(throttler.limit_for("B"), 15);
    assert_eq!(throttler.limit_for("C"), 20);
}

#[test]
fn unregister_releases_the_pin_to_the_sharers() {
    let throttler = Throttler::new(50, true);
    throttler.register("A");
    throttler.register("B");
    throttler.set_connection_limit(20, "C");

    throttler.unregister("C");

    assert_eq!(throttler.limit_for("A"), 25);
    assert_eq!(throttler.limit_for("B"), 25);
}

#[test]
fn overdraw_is_truncated_to_the_pool() {
    let throttler = Throttler::new(50, true);
    throttler.register("B");
    throttler.set_connection_limit(60, "A");

    assert_eq!(throttler.limit_for("A"), 50);
    assert_eq!(throttler.limit_for("B"), 0);
}

#[test]
fn lowering_the_budget_below_the_pins_collapses_them() {
    let throttler = Throttler::new(60, true);
    throttler.register("xyz");
    throttler.set_connection_limit(30, "abc");
    throttler.set_connection_limit(20, "qwe");

    assert_eq!(throttler.limit_for("abc"), 30);
    assert_eq!(throttler.limit_for("qwe"), 20);
    assert_eq!(throttler.limit_for("xyz"), 10);

    throttler.set_server_limit(5);

    assert_eq!(throttler.limit_for("abc"), 2);
    assert_eq!(throttler.limit_for("qwe"), 2);
    assert_eq!(throttler.limit_for("xyz"), 0);
    assert_eq!(throttler.free_pool(), 0);
    assert_eq!(throttler.server_limit(), 5);
}

#[test]
fn register_and_unregister_are_idempotent() {
    let throttler = Throttler::new(50, true);
    throttler.register("A");
    throttler.register("A");
    throttler.register("B");
    assert_eq!(throttler.limit_for("A"), 25);

    throttler.unregister("B");
    throttler.unregister("B");
    assert_eq!(throttler.limit_for("A"), 50);
}

#[test]
fn unregister_round_trips_the_free_pool() {
    let throttler = Throttler::new(50, true);
    throttler.register("sharer");
    let before = throttler.free_pool();

    throttler.set_connection_limit(20, "pinned");
    throttler.unregister("pinned");

    assert_eq!(throttler.free_pool(), before);
    assert_eq!(throttler.limit_for("sharer"), 50);
}

#[test]
fn limits_never_exceed_the_server_budget() {
    let throttler = Throttler::new(50, true);
    throttler.register("A");
    throttler.set_connection_limit(200, "B");
    throttler.set_connection_limit(200, "C");

    for key in ["A", "B", "C", "unknown"] {
        assert!(throttler.limit_for(key) <= throttler.server_limit());
    }
}

#[test]
fn sharer_limits_sum_to_at_most_the_free_pool() {
    let throttler = Throttler::new(50, true);
    throttler.set_connection_limit(20, "pinned");
    let sharers = ["a", "b", "c", "d"];
    for key in sharers {
        throttler.register(key);
    }

    let total: u64 = sharers.iter().map(|k| throttler.limit_for(k)).sum();
    assert!(total <= throttler.free_pool(), "{total} > free pool");
}

#[test]
fn zero_budget_means_zero_everywhere() {
    let throttler = Throttler::new(0, true);
    throttler.register("A");
    throttler.set_connection_limit(10, "B");
    assert_eq!(throttler.limit_for("A"), 0);
    assert_eq!(throttler.limit_for("B"), 0);
}

#[test]
fn raising_the_budget_leaves_pins_untouched() {
    let throttler = Throttler::new(50, true);
    throttler.register("sharer");
    throttler.set_connection_limit(20, "pinned");

    throttler.set_server_limit(100);

    assert_eq!(throttler.limit_for("pinned"), 20);
    assert_eq!(throttler.limit_for("sharer"), 80);
}

// ---------------------------------------------------------------------------
// Paced writer
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn disabled_write_copies_everything_after_one_tick() {
    let throttler = Throttler::new(1, false);
    let cancel = CancellationToken::new();
    let payload = vec![b'x'; 70];
    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();

    let start = Instant::now();
    let (bytes, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(bytes, 70);
    assert_eq!(out, payload);
    assert_eq!(start.elapsed(), Duration::ZERO, "first tick is immediate");
}

#[tokio::test(start_paused = true)]
async fn enabled_write_paces_one_limit_chunk_per_second() {
    let throttler = Throttler::new(10, true);
    let cancel = CancellationToken::new();
    let payload = vec![b'y'; 35];
    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();

    let start = Instant::now();
    let (bytes, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(bytes, 35);
    assert_eq!(out, payload);
    // Chunks of 10/10/10/5 at t = 0s, 1s, 2s, 3s.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn deadline_cancellation_returns_the_partial_count() {
    let throttler = Throttler::new(4, true);
    let payload = vec![b'z'; 70];

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(900)).await;
        canceller.cancel();
    });

    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();
    let (bytes, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;

    // One tick fired and copied one 4-byte chunk; the second tick lost the
    // race against the deadline.
    assert!(matches!(outcome, WriteOutcome::Cancelled));
    assert_eq!(bytes, 4);
    assert_eq!(out, &payload[..4]);
}

#[tokio::test(start_paused = true)]
async fn zero_budget_write_stalls_until_cancelled() {
    let throttler = std::sync::Arc::new(Throttler::new(0, true));
    let cancel = CancellationToken::new();

    let write_cancel = cancel.clone();
    let write_throttler = throttler.clone();
    let mut handle = tokio::spawn(async move {
        let payload = vec![b'q'; 16];
        let mut src = payload.as_slice();
        let mut out: Vec<u8> = Vec::new();
        write_throttler
            .write(&write_cancel, &mut out, "abc", &mut src)
            .await
    });

    tokio::select! {
        _ = &mut handle => panic!("write finished despite a zero budget"),
        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
    }

    cancel.cancel();
    let (bytes, outcome) = handle.await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Cancelled));
    assert_eq!(bytes, 0);
}

#[tokio::test(start_paused = true)]
async fn budget_updates_apply_from_the_next_window() {
    let throttler = std::sync::Arc::new(Throttler::new(10, true));
    let cancel = CancellationToken::new();

    let updater = throttler.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        updater.set_server_limit(5);
    });

    let payload = vec![b'w'; 30];
    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();
    let start = Instant::now();
    let (bytes, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(bytes, 30);
    // The rate read at the start of each window sticks for that window:
    // 10 at t=0, 10 at t=1 (read before the t=0.5 update), then 5 at t=2,
    // 5 at t=3, and the end-of-stream tick at t=4.
    assert_eq!(start.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn disabling_mid_write_floods_on_the_next_tick() {
    let throttler = std::sync::Arc::new(Throttler::new(10, true));
    let cancel = CancellationToken::new();

    let switch = throttler.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        switch.disable();
    });

    let payload = vec![b'v'; 1000];
    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();
    let start = Instant::now();
    let (bytes, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(bytes, 1000);
    // 10 bytes at t=0, the rest in one shot at the t=1 tick.
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn exact_multiple_of_the_limit_ends_on_the_empty_tick() {
    let throttler = Throttler::new(10, true);
    let cancel = CancellationToken::new();
    let payload = vec![b'u'; 20];
    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();

    let start = Instant::now();
    let (bytes, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(bytes, 20);
    // 10 at t=0, 10 at t=1, and the empty end-of-stream copy at t=2.
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn write_registers_its_key_as_a_sharer() {
    let throttler = Throttler::new(50, true);
    let cancel = CancellationToken::new();
    let payload = vec![b't'; 10];
    let mut src = payload.as_slice();
    let mut out: Vec<u8> = Vec::new();

    let (_, outcome) = throttler.write(&cancel, &mut out, "abc", &mut src).await;
    assert!(outcome.is_completed());

    // Still registered after the transfer; unregistering is the caller's job.
    assert_eq!(throttler.limit_for("abc"), 50);
    throttler.unregister("abc");
    assert_eq!(throttler.limit_for("abc"), 0);
}
