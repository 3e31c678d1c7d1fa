//! Integration tests: storage queue → debounced autosave → retry.
//!
//! Every test runs in paused virtual time, so timings are exact: a change
//! notified at t=0 is detected at t=50 (settle delay) and synced at t=550
//! (autosave debounce).

mod common;

use common::*;
use folio_core::Theme;
use folio_sync::{EngineEvent, NotificationSource, SyncConfig};
use pretty_assertions::assert_eq;

// ─── Debounce ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn startup_with_settled_store_does_not_sync() {
    let h = Harness::start(config());
    advance(2_000).await;

    assert_eq!(h.engine.active_document(), Some(alpha()));
    assert_eq!(h.recorder.loaded(), vec![alpha()]);
    assert_eq!(h.engine.stats().syncs, 0);
    assert_eq!(h.documents.put_count(alpha()), 0);
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_one_sync_of_the_latest_state() {
    let h = Harness::start(config());
    advance(100).await;

    for n in 1..=5 {
        h.edit_text("a-title", &format!("Alpha v{n}"));
        advance(20).await;
    }
    advance(1_500).await;

    assert_eq!(h.documents.put_count(alpha()), 1);
    assert_eq!(h.recorder.sync_requests(alpha()), 1);
    assert_eq!(h.persisted_text(alpha(), "a-title").as_deref(), Some("Alpha v5"));
    assert_eq!(h.engine.stats().syncs, 1);
    assert_eq!(h.engine.pending_operations(), 0);
    assert!(h.engine.registry_is_consistent());
    assert_eq!(h.engine.queue_status(), (0, false));
}

#[tokio::test(start_paused = true)]
async fn synced_state_becomes_the_baseline() {
    let h = Harness::start(config());
    h.edit_text("a-title", "Renamed");
    advance(1_000).await;
    assert_eq!(h.engine.stats().syncs, 1);
    let baseline = h.engine.last_sync_data().unwrap();
    assert!(baseline.contains("Renamed"), "{baseline}");

    // Navigation only: scroll and zoom are not content.
    h.slots.put_raw(
        STATE,
        r##"{"theme":"light","viewBackgroundColor":"#ffffff","zoom":{"value":2},"scrollX":300}"##,
    );
    h.engine.notify_storage_change(NotificationSource::Native);
    advance(1_000).await;

    assert_eq!(h.engine.stats().syncs, 1);
    assert_eq!(h.documents.put_count(alpha()), 1);
}

#[tokio::test(start_paused = true)]
async fn instrumented_writes_trigger_a_sync() {
    let h = Harness::start(config());
    h.engine
        .instrumented_write(ELEMENTS, r#"[{"id":"a-title","type":"text","text":"From the extension"}]"#)
        .unwrap();
    advance(1_000).await;

    assert_eq!(h.documents.put_count(alpha()), 1);
    assert_eq!(
        h.persisted_text(alpha(), "a-title").as_deref(),
        Some("From the extension")
    );
}

#[tokio::test(start_paused = true)]
async fn theme_changes_are_announced() {
    let h = Harness::start(config());
    h.slots.put_raw(STATE, r##"{"theme":"dark","viewBackgroundColor":"#ffffff"}"##);
    h.engine.notify_storage_change(NotificationSource::Poll);
    advance(100).await;

    let themes: Vec<Theme> = h
        .recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::ThemeChanged { theme } => Some(theme),
            _ => None,
        })
        .collect();
    assert_eq!(themes, vec![Theme::Dark]);
}

// ─── Validity ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stale_autosave_never_emits() {
    let h = Harness::start(SyncConfig {
        autosave_debounce_ms: 2_000,
        staleness_ms: 1_500,
        ack_timeout_ms: 500,
        retry_base_delay_ms: 100,
        ..config()
    });
    h.edit_text("a-title", "Too late");
    advance(3_000).await;

    assert_eq!(h.recorder.sync_requests(alpha()), 0);
    assert_eq!(h.documents.put_count(alpha()), 0);
    assert_eq!(h.engine.stats().abandoned, 1);
    assert_eq!(h.engine.pending_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_scheduled_autosaves() {
    let h = Harness::start(config());
    h.edit_text("a-title", "Unsaved");
    advance(100).await;
    assert_eq!(h.engine.pending_operations(), 1);

    h.engine.stop();
    h.edit_text("a-title", "Ignored");
    advance(2_000).await;

    assert!(!h.engine.is_running());
    assert_eq!(h.engine.pending_operations(), 0);
    assert_eq!(h.recorder.sync_requests(alpha()), 0);
}

// ─── Failures ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retries_back_off_then_succeed() {
    let h = Harness::start(config());
    h.documents.fail_next_puts(2);
    h.edit_text("a-title", "Eventually saved");

    // First attempt fails at t=550, retry 1 is due 1s later.
    advance(600).await;
    assert_eq!(h.engine.retry_count(), 1);

    // Retry 1 fails at t=1550, retry 2 is due 2s later.
    advance(1_000).await;
    assert_eq!(h.engine.retry_count(), 2);
    advance(1_900).await;
    assert_eq!(h.engine.retry_count(), 2);

    // Retry 2 succeeds at t=3550.
    advance(200).await;
    assert_eq!(h.engine.retry_count(), 0);

    let stats = h.engine.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.syncs, 1);
    assert_eq!(stats.retry_exhaustions, 0);
    assert_eq!(
        h.persisted_text(alpha(), "a-title").as_deref(),
        Some("Eventually saved")
    );
    assert!(h.engine.last_sync_data().unwrap().contains("Eventually saved"));
    assert_eq!(h.engine.pending_operations(), 0);
    assert!(h.recorder.error_messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_one_error_and_recover() {
    let h = Harness::start(config());
    h.documents.fail_next_puts(100);
    h.edit_text("a-title", "Doomed");
    advance(10_000).await;

    let stats = h.engine.stats();
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.retry_exhaustions, 1);
    assert_eq!(h.engine.retry_count(), 0);
    assert_eq!(h.engine.pending_operations(), 0);
    assert_eq!(
        h.recorder.error_messages(),
        vec!["Failed to save document after multiple attempts".to_string()]
    );

    // The engine stays usable for the next change.
    h.documents.fail_next_puts(0);
    h.edit_text("a-title", "Recovered");
    advance(1_000).await;
    assert_eq!(h.persisted_text(alpha(), "a-title").as_deref(), Some("Recovered"));
}

#[tokio::test(start_paused = true)]
async fn storage_read_failures_are_retried() {
    let h = Harness::start(config());
    h.edit_text("a-title", "Flaky read");
    // Let change detection read first, then break the next read.
    advance(100).await;
    h.slots.fail_next_reads(1);
    advance(2_000).await;

    assert_eq!(h.engine.stats().retries, 1);
    assert_eq!(h.engine.stats().syncs, 1);
    assert_eq!(h.persisted_text(alpha(), "a-title").as_deref(), Some("Flaky read"));
    assert_eq!(h.recorder.error_messages(), vec!["External storage read failed".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn malformed_records_abort_without_retry() {
    let h = Harness::start(config());
    let baseline = h.engine.last_sync_data();
    h.slots.put_raw(ELEMENTS, r#"[{"type":"text","text":"no id"}]"#);
    h.engine.notify_storage_change(NotificationSource::Native);
    advance(5_000).await;

    let stats = h.engine.stats();
    assert_eq!(stats.integrity_aborts, 1);
    assert_eq!(stats.retries, 0);
    assert_eq!(h.engine.last_sync_data(), baseline);
    assert_eq!(h.documents.put_count(alpha()), 0);
    assert_eq!(h.engine.pending_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn without_a_listener_saves_fail_and_retry() {
    let h = Harness::start_without_listener(config());
    h.edit_text("a-title", "Nobody hears");
    advance(600).await;

    assert_eq!(h.engine.retry_count(), 1);
    assert_eq!(h.engine.stats().syncs, 0);
}

#[tokio::test(start_paused = true)]
async fn pending_retry_is_dropped_when_the_document_changes() {
    let h = Harness::start(config());
    h.documents.fail_next_puts(1);
    h.edit_text("a-title", "Before leaving");

    // First attempt fails at t=550, retry 1 would run at t=1550.
    advance(600).await;
    assert_eq!(h.engine.retry_count(), 1);
    assert_eq!(h.engine.pending_operations(), 1);

    h.engine
        .load_document(h.document(beta()), false)
        .await
        .unwrap();
    assert_eq!(h.engine.active_document(), Some(beta()));
    assert_eq!(h.engine.retry_count(), 0);
    advance(10_000).await;

    // The autosave and the switch save; the retry never ran.
    assert_eq!(h.recorder.sync_requests(alpha()), 2);
    assert_eq!(h.recorder.sync_requests(beta()), 0);
    let stats = h.engine.stats();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.retry_exhaustions, 0);
    assert_eq!(h.engine.pending_operations(), 0);
    assert_eq!(
        h.persisted_text(alpha(), "a-title").as_deref(),
        Some("Before leaving")
    );
    assert_eq!(h.persisted_text(beta(), "b-note").as_deref(), Some("Beta"));
    assert!(h.recorder.error_messages().is_empty());
}
