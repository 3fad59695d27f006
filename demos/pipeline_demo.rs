//! Demonstration of the Velvet Pattern Engine pipeline.
//!
//! This example shows how to:
//! 1. Build an engine from the stock configuration
//! 2. Push behavioral signal events through the ingestion handle
//! 3. Drive batch cycles against a deterministic clock
//! 4. Watch severity escalate and interventions dispatch
//!
//! Run with: cargo run --example pipeline_demo

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use velvet_pattern_engine::{
    AudioFeatures, Clock, EngineConfig, EngineCore, ManualClock, RawSignalEvent,
    PRIVACY_DECLARATION,
};

fn main() {
    println!("Velvet Pattern Engine - Pipeline Demo");
    println!("=====================================");
    println!();

    // Display privacy declaration
    println!("{PRIVACY_DECLARATION}");
    println!();

    // A manual clock makes the run fully reproducible.
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ));
    let mut engine = EngineCore::new(EngineConfig::default(), clock.clone() as Arc<dyn Clock>)
        .expect("stock configuration is valid");
    let sender = engine.sender();

    // --- Scene 1: a sarcastic exchange, typed flat -----------------------
    println!("Scene 1: on-screen text with a flat voice delivery");
    sender
        .push(RawSignalEvent::text(
            clock.now(),
            "conversation",
            "Sure, that's fine, whatever works.",
        ))
        .expect("event accepted");
    clock.advance_ms(400);
    sender
        .push(RawSignalEvent::audio(
            clock.now(),
            "conversation",
            AudioFeatures {
                flatness: 0.85,
                energy: 0.15,
                pitch_variance: 0.1,
            },
        ))
        .expect("event accepted");

    run_batch(&mut engine, &clock);

    // --- Scene 2: an app-switching storm ---------------------------------
    println!("Scene 2: 20 focus changes across 20 apps in five minutes");
    for i in 0..20 {
        sender
            .push(RawSignalEvent::window_focus(
                clock.now(),
                "window_focus",
                format!("app-{i:02}"),
            ))
            .expect("event accepted");
        clock.advance_ms(10_000);
    }

    run_batch(&mut engine, &clock);

    // --- Scene 3: cursor hover paralysis ----------------------------------
    println!("Scene 3: cursor barely moving for ten seconds");
    for _ in 0..10 {
        sender
            .push(RawSignalEvent::cursor(clock.now(), "cursor", 0.3))
            .expect("event accepted");
        clock.advance_ms(1000);
    }

    run_batch(&mut engine, &clock);

    // --- Scene 4: quiet again ---------------------------------------------
    println!("Scene 4: six minutes of nothing");
    clock.advance_ms(360_000);
    run_batch(&mut engine, &clock);

    // Final statistics
    println!();
    println!("{}", engine.metrics_handle().summary(clock.now()));
    println!();
    println!("Recent interventions:");
    for intervention in engine.history() {
        println!(
            "  [{}] {} :: {}",
            intervention.created_at.format("%H:%M:%S"),
            intervention.priority,
            intervention.message
        );
    }
    println!();
    println!("Demo complete!");
}

fn run_batch(engine: &mut EngineCore, clock: &Arc<ManualClock>) {
    let outcome = engine.tick();

    for (feature, change) in &outcome.severity_changes {
        println!("  severity[{feature}]: {} -> {}", change.from, change.to);
    }
    for intervention in &outcome.dispatched {
        println!(
            "  >> [{}] {} ({})",
            intervention.priority, intervention.message, intervention.kind
        );
        for line in &intervention.evidence {
            println!("     - {line}");
        }
    }
    if outcome.dispatched.is_empty() && outcome.severity_changes.is_empty() {
        println!("  (no change)");
    }

    println!(
        "  merged severity: {} at {}",
        engine.merged_severity(),
        clock.now().format("%H:%M:%S")
    );
    println!();
}
