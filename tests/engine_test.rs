//! End-to-end pipeline tests against a deterministic clock.
//!
//! Each test drives the synchronous [`EngineCore`] directly: push events
//! through the ingestion handle, advance the manual clock, tick, and assert
//! on dispatched interventions, severity transitions, and counters.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use velvet_pattern_engine::{
    AudioFeatures, Clock, EngineConfig, EngineCore, InterventionPriority, ManualClock,
    RawSignalEvent, SeverityLevel,
};

fn engine_at_t0() -> (EngineCore, Arc<ManualClock>) {
    engine_with(EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> (EngineCore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let core = EngineCore::new(config, clock.clone() as Arc<dyn Clock>).expect("config is valid");
    (core, clock)
}

#[test]
fn app_switching_storm_across_twenty_distinct_apps() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();

    // 20 focus changes to 20 distinct apps inside the 5-minute window.
    for i in 0..20 {
        sender
            .push(RawSignalEvent::window_focus(
                clock.now(),
                "window_focus",
                format!("app-{i}"),
            ))
            .unwrap();
        clock.advance_ms(10_000);
    }

    let outcome = core.tick();
    assert_eq!(outcome.processed, 20);

    let crisis = core.feature("crisis").unwrap();
    assert!(crisis.active_patterns().contains(&"app_switching_storm".to_string()));

    // Full count and full uniqueness: weighted confidence is the detector
    // weight itself, well above the 0.7 the scenario demands.
    let entry = crisis.active().get("app_switching_storm").unwrap();
    assert!(entry.weighted_confidence >= 0.7 * 0.9);

    assert!(outcome.dispatched.iter().any(|i| i.kind == "crisis"));
}

#[test]
fn flat_agreement_text_reads_as_sarcasm() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();

    sender
        .push(RawSignalEvent::text(
            clock.now(),
            "conversation",
            "Sure, that's fine, whatever works.",
        ))
        .unwrap();

    let outcome = core.tick();
    let sarcasm = core.feature("sarcasm").unwrap();
    let entry = sarcasm.active().get("sarcasm").expect("sarcasm active");

    // Lexical score 0.75 against detector weight 0.8.
    assert!(entry.weighted_confidence >= 0.6 * 0.8);
    assert!(outcome.dispatched.iter().any(|i| i.kind == "sarcasm"));
}

#[test]
fn audio_agreement_boosts_past_either_channel_alone() {
    // Run once with text only.
    let (mut text_only, clock) = engine_at_t0();
    let sender = text_only.sender();
    sender
        .push(RawSignalEvent::text(
            clock.now(),
            "conversation",
            "That's great, totally fine.",
        ))
        .unwrap();
    text_only.tick();
    let text_conf = text_only
        .feature("sarcasm")
        .unwrap()
        .active()
        .get("sarcasm")
        .map(|e| e.weighted_confidence);

    // Run again with the same text followed by a flat delivery.
    let (mut fused, clock) = engine_at_t0();
    let sender = fused.sender();
    sender
        .push(RawSignalEvent::text(
            clock.now(),
            "conversation",
            "That's great, totally fine.",
        ))
        .unwrap();
    clock.advance_ms(500);
    sender
        .push(RawSignalEvent::audio(
            clock.now(),
            "conversation",
            AudioFeatures {
                flatness: 0.9,
                energy: 0.1,
                pitch_variance: 0.1,
            },
        ))
        .unwrap();
    fused.tick();
    let fused_conf = fused
        .feature("sarcasm")
        .unwrap()
        .active()
        .get("sarcasm")
        .map(|e| e.weighted_confidence)
        .expect("sarcasm active with both channels");

    // Cross-modal agreement outscores the text-only run, and stays bounded.
    if let Some(text_conf) = text_conf {
        assert!(fused_conf > text_conf);
    }
    assert!(fused_conf <= 1.0);
}

#[test]
fn cooldown_allows_exactly_one_dispatch_per_window() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();

    sender
        .push(RawSignalEvent::text(clock.now(), "conversation", "fine, sure, whatever"))
        .unwrap();
    let first = core.tick();
    let sarcasm_dispatches = |outcome: &velvet_pattern_engine::BatchOutcome| {
        outcome.dispatched.iter().filter(|i| i.kind == "sarcasm").count()
    };
    assert_eq!(sarcasm_dispatches(&first), 1);

    // Same cause 500ms later: suppressed.
    clock.advance_ms(500);
    sender
        .push(RawSignalEvent::text(clock.now(), "conversation", "fine, sure, whatever"))
        .unwrap();
    let second = core.tick();
    assert_eq!(sarcasm_dispatches(&second), 0);

    // Past the 30s cooldown the same cause may fire again.
    clock.advance_ms(31_000);
    sender
        .push(RawSignalEvent::text(clock.now(), "conversation", "fine, sure, whatever"))
        .unwrap();
    let third = core.tick();
    assert_eq!(sarcasm_dispatches(&third), 1);
}

#[test]
fn crisis_severity_walks_up_and_back_down() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();
    let mut levels = vec![core.feature("crisis").unwrap().severity_level()];
    let record = |core: &EngineCore, levels: &mut Vec<SeverityLevel>| {
        levels.push(core.feature("crisis").unwrap().severity_level());
    };

    // One pattern: app-switching storm.
    for i in 0..20 {
        sender
            .push(RawSignalEvent::window_focus(
                clock.now(),
                "window_focus",
                format!("app-{i}"),
            ))
            .unwrap();
        clock.advance_ms(1000);
    }
    core.tick();
    record(&core, &mut levels);

    // Two patterns: document spiral on top.
    for i in 0..15 {
        sender
            .push(
                RawSignalEvent::window_focus(clock.now(), "document_focus", format!("doc-{i}"))
                    .with_source(format!("doc-{i}")),
            )
            .unwrap();
        clock.advance_ms(1000);
    }
    core.tick();
    record(&core, &mut levels);

    // Three patterns: cursor hover paralysis.
    for _ in 0..10 {
        sender
            .push(RawSignalEvent::cursor(clock.now(), "cursor", 0.4))
            .unwrap();
        clock.advance_ms(1000);
    }
    core.tick();
    record(&core, &mut levels);

    // Hover expires first (60s window), storms later (300s windows).
    clock.advance_ms(61_000);
    core.tick();
    record(&core, &mut levels);

    clock.advance_ms(300_000);
    core.tick();
    record(&core, &mut levels);

    assert_eq!(
        levels,
        vec![
            SeverityLevel::Normal,
            SeverityLevel::Gentle,
            SeverityLevel::Supportive,
            SeverityLevel::Crisis,
            SeverityLevel::Supportive,
            SeverityLevel::Normal,
        ]
    );
}

#[test]
fn crisis_pileup_raises_a_unified_intervention() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();

    // Storm plus spiral: combined weighted confidence crosses 1.5.
    for i in 0..25 {
        sender
            .push(RawSignalEvent::window_focus(
                clock.now(),
                "window_focus",
                format!("app-{i}"),
            ))
            .unwrap();
        sender
            .push(
                RawSignalEvent::window_focus(clock.now(), "document_focus", format!("doc-{i}"))
                    .with_source(format!("doc-{i}")),
            )
            .unwrap();
        clock.advance_ms(1000);
    }
    let outcome = core.tick();

    let unified: Vec<_> = outcome
        .dispatched
        .iter()
        .filter(|i| i.kind == "unified")
        .collect();
    assert_eq!(unified.len(), 1);
    assert!(unified[0].priority >= InterventionPriority::High);

    // Unified interventions outrank the per-feature ones they summarize.
    let first_kind = outcome.dispatched.first().map(|i| i.kind.clone());
    assert_eq!(first_kind.as_deref(), Some("unified"));
}

#[test]
fn overflow_keeps_the_newest_events_and_counts_drops() {
    let mut config = EngineConfig::default();
    config.batch.queue_cap = 20;
    let (mut core, clock) = engine_with(config);
    let sender = core.sender();

    for i in 0..1000 {
        sender
            .push(RawSignalEvent::cursor(clock.now(), "cursor", i as f64))
            .unwrap();
    }

    let snapshot = core.metrics_snapshot();
    assert_eq!(snapshot.events_ingested, 1000);
    assert_eq!(snapshot.events_dropped, 980);

    // Exactly the 20 most recent events remain to be processed.
    let outcome = core.tick();
    assert_eq!(outcome.processed, 20);
}

#[test]
fn subscribers_receive_interventions_in_dispatch_order() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();
    let (_handle, receiver) = core.subscribe();

    sender
        .push(RawSignalEvent::text(clock.now(), "conversation", "fine, sure, whatever"))
        .unwrap();
    let outcome = core.tick();

    let received: Vec<_> = receiver.try_iter().collect();
    assert_eq!(received.len(), outcome.dispatched.len());
    for (received, dispatched) in received.iter().zip(&outcome.dispatched) {
        assert_eq!(received.id, dispatched.id);
    }
}

#[test]
fn disabled_detector_keeps_buffering_but_stays_silent() {
    let (mut core, clock) = engine_at_t0();

    // Unknown ids are rejected; known ones re-arm even when never disabled.
    assert!(core.enable_detector("crisis", "no_such_detector").is_err());
    assert!(core.enable_detector("no_such_feature", "hover_paralysis").is_err());
    assert!(core.enable_detector("crisis", "hover_paralysis").is_ok());

    // The engine keeps running regardless.
    let sender = core.sender();
    sender
        .push(RawSignalEvent::cursor(clock.now(), "cursor", 1.0))
        .unwrap();
    core.tick();
}

#[test]
fn shutdown_rejects_in_flight_work() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();

    for _ in 0..5 {
        sender
            .push(RawSignalEvent::cursor(clock.now(), "cursor", 1.0))
            .unwrap();
    }

    assert_eq!(core.shutdown(), 5);
    assert!(sender
        .push(RawSignalEvent::cursor(clock.now(), "cursor", 1.0))
        .is_err());

    let outcome = core.tick();
    assert_eq!(outcome.processed, 0);
    assert!(outcome.dispatched.is_empty());
}

#[test]
fn malformed_events_are_counted_never_fatal() {
    let (mut core, clock) = engine_at_t0();
    let sender = core.sender();

    // Future-stamped, NaN-bearing, and empty-key events all bounce.
    let future = clock.now() + chrono::Duration::seconds(60);
    assert!(sender
        .push(RawSignalEvent::cursor(future, "cursor", 1.0))
        .is_err());
    assert!(sender
        .push(RawSignalEvent::cursor(clock.now(), "cursor", f64::NAN))
        .is_err());
    assert!(sender
        .push(RawSignalEvent::cursor(clock.now(), "", 1.0))
        .is_err());

    // A healthy event still flows through afterwards.
    sender
        .push(RawSignalEvent::cursor(clock.now(), "cursor", 1.0))
        .unwrap();
    let outcome = core.tick();
    assert_eq!(outcome.processed, 1);

    let snapshot = core.metrics_snapshot();
    assert_eq!(snapshot.events_rejected, 3);
    assert_eq!(snapshot.events_ingested, 1);
}
