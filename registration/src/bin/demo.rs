//! Meet Registration Demo
//!
//! Walks one small meet through admission, waitlisting, withdrawal, approval,
//! payment and weigh-in on the in-memory store, then prints the event
//! statistics and the Prometheus metrics the run produced.
//!
//! # Usage
//!
//! ```bash
//! REGISTRATION_LOG=info cargo run --bin registration-demo
//! ```

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use meetreg_core::environment::SystemClock;
use meetreg_runtime::metrics::MetricsExporter;
use registration::metrics::register_business_metrics;
use registration::{
    Capacity, Category, CategoryOptions, Config, EmergencyContact, Event, EventId,
    EventLifecycle, FeeSchedule, Gender, InMemoryProfileProvider, InMemoryRegistrationStore,
    Money, ParticipantId, ParticipantProfile, PaymentStatus, RegistrationEngine,
    RegistrationForm, RegistrationId, RegistrationStatus, TracingNotifier,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.observability.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut exporter = MetricsExporter::new();
    if config.observability.metrics_enabled {
        exporter.install().context("failed to install metrics recorder")?;
        register_business_metrics();
    }

    println!("\n🏋️ ============================================");
    println!("   Meet Registration - Live Demo");
    println!("============================================\n");

    let now = Utc::now();
    let (p1, p2, p3) = (ParticipantId::new(), ParticipantId::new(), ParticipantId::new());
    let profiles = InMemoryProfileProvider::from_profiles([p1, p2, p3].map(|participant_id| {
        ParticipantProfile {
            participant_id,
            date_of_birth: NaiveDate::from_ymd_opt(1994, 9, 17).unwrap_or_default(),
            gender: Gender::Female,
            emergency_contact: Some(EmergencyContact {
                name: "Casey Morgan".to_string(),
                phone: "+1 555 0142".to_string(),
                relationship: "friend".to_string(),
            }),
        }
    }));

    let engine = RegistrationEngine::new(
        Arc::new(InMemoryRegistrationStore::new()),
        Arc::new(SystemClock),
        TracingNotifier::shared(),
        Arc::new(profiles),
    )
    .with_retry_policy(config.engine.retry_policy());

    // ========== Event setup ==========

    let event_id = EventId::new();
    let event = Event::new(
        event_id,
        "Autumn Classic",
        Capacity::new(2),
        now + Duration::days(21),
        FeeSchedule::with_early_bird(Money::from_units(85), Money::from_units(75), now + Duration::days(7)),
    )
    .with_lifecycle(EventLifecycle::RegistrationOpen)
    .with_options(CategoryOptions {
        weight_classes: vec!["57kg".into(), "63kg".into(), "69kg".into()],
        divisions: vec!["open".into(), "junior".into()],
        equipment: vec!["raw".into()],
    });
    engine.save_event(event).await?;
    println!("1️⃣  Event 'Autumn Classic' open with 2 seats");

    // ========== Admissions ==========

    let form = |weight_class: &str, kg: f64| {
        RegistrationForm::new(Category::new(weight_class, "open", "raw")).with_expected_weight(kg)
    };

    for (participant, weight_class, kg) in [(p1, "57kg", 56.2), (p2, "63kg", 62.0), (p3, "69kg", 68.4)] {
        let registration = engine.admit(event_id, participant, form(weight_class, kg)).await?;
        println!(
            "2️⃣  Admitted {participant} as {} (fee {})",
            registration.status, registration.fee
        );
    }

    // ========== Withdrawal frees a seat for the waitlist ==========

    engine.withdraw(event_id, p1, Some("travel conflict".to_string())).await?;
    println!("3️⃣  {p1} withdrew");

    let promoted = engine
        .transition(RegistrationId::new(event_id, p3), RegistrationStatus::Approved, None)
        .await?;
    println!("4️⃣  {p3} moved from the waitlist to {}", promoted.status);

    // ========== Payment and weigh-in ==========

    let p2_id = RegistrationId::new(event_id, p2);
    engine.transition(p2_id, RegistrationStatus::Approved, Some("documents verified".to_string())).await?;
    engine.update_payment_status(p2_id, PaymentStatus::Paid).await?;
    engine.assign_flight(p2_id, "A".to_string(), Some(1)).await?;
    engine.record_weigh_in(p2_id, 62.7, true, None).await?;
    println!("5️⃣  {p2} approved, paid, placed in flight A and weighed in");

    engine.flush_effects().await;

    // ========== Results ==========

    let stats = engine.get_stats(event_id).await?;
    println!("\n📊 Event statistics:");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let event = engine.get_event(event_id).await?;
    println!("\n💰 Cached revenue: {}", event.cached_revenue);

    if let Some(rendered) = exporter.render() {
        println!("\n📈 Metrics:\n{rendered}");
    }

    engine
        .shutdown(std::time::Duration::from_secs(config.engine.shutdown_timeout))
        .await;
    Ok(())
}
