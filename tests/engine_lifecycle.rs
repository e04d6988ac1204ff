//! End-to-end engine behaviour: sampling, visit learning, arrival
//! notifications and reminder replacement.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use gym_proximity::{
    Coordinate, EngineConfig, ErrorCallback, GatewayCommand, GymProfile, KeyValueStore,
    LocationSampler, MemoryStore, NotificationChannel, PositionProvider, ProximityError,
    ProximitySample, ProximityTarget, QueuedGateway, ReminderEngine, ReminderSettings,
    RepeatInterval, Result, SampleCallback, SamplerState, Transition,
};

const OWNER: &str = "gym-reminders";

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn gym() -> GymProfile {
    GymProfile::new(
        "iron-temple",
        "Iron Temple",
        ProximityTarget::new(Coordinate::new(40.7411, -73.9897), 100.0),
    )
}

fn inside() -> Coordinate {
    Coordinate::new(40.7413, -73.9897)
}

fn outside() -> Coordinate {
    Coordinate::new(40.7500, -73.9897)
}

// 2024-03-04 is a Monday
fn monday(week: i64, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(hour, 5, 0)
        .unwrap()
        + chrono::Duration::weeks(week)
}

fn new_engine(store: Arc<dyn KeyValueStore>) -> (ReminderEngine, Arc<QueuedGateway>) {
    let gateway = Arc::new(QueuedGateway::new());
    let config = EngineConfig {
        arm_retry_backoff_ms: 0,
        ..EngineConfig::default()
    };
    let engine = ReminderEngine::new(store, gateway.clone(), config).unwrap();
    (engine, gateway)
}

fn arrival_notifications(gateway: &QueuedGateway) -> Vec<String> {
    gateway
        .drain()
        .into_iter()
        .filter_map(|c| match c {
            GatewayCommand::DeliverNow { payload }
                if payload.channel == NotificationChannel::LocationAlerts =>
            {
                Some(payload.title)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_weeks_of_visits_switch_plan_to_patterns() {
    init_logs();
    let (mut engine, gateway) = new_engine(Arc::new(MemoryStore::new()));
    engine.set_gyms(vec![gym()]);
    assert!(engine.initialize().unwrap());

    let report = engine.on_foreground(monday(0, 8)).unwrap().unwrap();
    assert_eq!(report.armed, 2);
    let armed = gateway.armed(OWNER);
    assert!(armed.iter().all(|r| r.repeat == RepeatInterval::Daily));

    for week in 0..6 {
        engine.observe_position(inside(), monday(week, 18));
        engine.observe_position(inside(), monday(week, 18) + chrono::Duration::minutes(30));
        engine.observe_position(outside(), monday(week, 20));
    }

    let patterns = engine.patterns();
    assert_eq!(patterns.total_visits, 6);
    assert_eq!(patterns.preferred_days(3), vec![1]);
    assert_eq!(patterns.preferred_hours(2), vec![18]);

    let armed = gateway.armed(OWNER);
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].id, "weekly-1-18");
    assert!(armed[0].scheduled_at > monday(5, 18));

    let titles = arrival_notifications(&gateway);
    assert_eq!(titles.len(), 6);
    assert!(titles.iter().all(|t| t == "Arrived at Iron Temple"));
    assert_eq!(engine.last_visit().unwrap().timestamp, monday(5, 18));
}

#[test]
fn test_settings_edit_replaces_armed_set() {
    init_logs();
    let (mut engine, gateway) = new_engine(Arc::new(MemoryStore::new()));

    engine.reschedule(monday(0, 12)).unwrap();
    assert_eq!(gateway.armed(OWNER).len(), 2);

    let settings = ReminderSettings {
        reminder_times: vec!["05:30".to_string(), "12:15".to_string(), "19:45".to_string()],
        ..ReminderSettings::default()
    };
    engine.update_settings(settings, monday(0, 12)).unwrap();

    let ids: Vec<String> = gateway.armed(OWNER).into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["daily-05:30", "daily-12:15", "daily-19:45"]);
    assert!(gateway
        .armed(OWNER)
        .iter()
        .all(|r| r.scheduled_at > monday(0, 12)));
}

/// Store whose writes always fail.
#[derive(Default)]
struct ReadOnlyStore;

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(ProximityError::StorageUnavailable {
            message: "disk full".to_string(),
        })
    }
    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_failed_writes_are_reported_not_fatal() {
    init_logs();
    let (mut engine, gateway) = new_engine(Arc::new(ReadOnlyStore));
    let gym = gym();

    let sample = ProximitySample::evaluate(inside(), &gym.target, monday(0, 18));
    let outcome = engine.observe_sample(&gym, &sample);

    assert_eq!(outcome.transition, Transition::Arrived);
    assert!(outcome.visit_recorded);
    assert!(outcome.notification_delivered);
    assert_eq!(outcome.warnings.len(), 2);
    assert!(outcome
        .warnings
        .iter()
        .all(|w| matches!(w, ProximityError::StorageUnavailable { .. })));

    // Counted in memory for the rest of the process
    assert_eq!(engine.patterns().total_visits, 1);
    assert_eq!(arrival_notifications(&gateway).len(), 1);

    let report = engine
        .update_settings(ReminderSettings::default(), monday(0, 19))
        .unwrap();
    assert_eq!(report.armed, 2);
    assert_eq!(report.warnings.len(), 1);
}

#[cfg(feature = "persistence")]
#[test]
fn test_sqlite_store_survives_restart() {
    use gym_proximity::SqliteStore;

    init_logs();
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("reminders.db");
    let path = path.to_str().unwrap();

    {
        let (mut engine, _) = new_engine(Arc::new(SqliteStore::new(path).unwrap()));
        let gym = gym();
        engine.observe_sample(
            &gym,
            &ProximitySample::evaluate(inside(), &gym.target, monday(0, 7)),
        );
        let settings = ReminderSettings {
            weekly_stats: true,
            ..ReminderSettings::default()
        };
        engine.update_settings(settings, monday(0, 8)).unwrap();
    }

    let (engine, _) = new_engine(Arc::new(SqliteStore::new(path).unwrap()));
    assert_eq!(engine.patterns().total_visits, 1);
    assert!(engine.settings().weekly_stats);
    assert_eq!(engine.last_visit().unwrap().gym_name, "Iron Temple");
}

// ============================================================================
// Sampler driving the engine
// ============================================================================

struct WalkingProvider {
    route: Mutex<VecDeque<Coordinate>>,
}

#[async_trait]
impl PositionProvider for WalkingProvider {
    async fn request_permission(&self) -> bool {
        true
    }

    async fn current_position(&self) -> Result<Coordinate> {
        self.route
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ProximityError::PositionUnavailable {
                message: "end of route".to_string(),
            })
    }
}

#[tokio::test(start_paused = true)]
async fn test_sampler_feeds_engine() {
    init_logs();
    let (engine, gateway) = new_engine(Arc::new(MemoryStore::new()));
    let config = engine.config().clone();
    let engine = Arc::new(Mutex::new(engine));
    let gym = gym();

    // far, near, near, far, near, near
    let route = vec![outside(), inside(), inside(), outside(), inside(), inside()];
    let provider = Arc::new(WalkingProvider {
        route: Mutex::new(route.into()),
    });
    let sampler = LocationSampler::with_config(provider, &config);

    let on_sample: SampleCallback = {
        let engine = Arc::clone(&engine);
        let gym = gym.clone();
        Arc::new(move |sample| {
            engine.lock().unwrap().observe_sample(&gym, &sample);
        })
    };
    let errors = Arc::new(Mutex::new(Vec::new()));
    let on_error: ErrorCallback = {
        let errors = Arc::clone(&errors);
        Arc::new(move |e| errors.lock().unwrap().push(e))
    };

    let state = sampler
        .start(gym.target, config.sample_interval(), on_sample, on_error)
        .await;
    assert_eq!(state, SamplerState::Tracking);

    // Six fixes at t = 0, 30, ..., 150
    tokio::time::sleep(Duration::from_secs(160)).await;
    sampler.stop();

    assert_eq!(arrival_notifications(&gateway).len(), 2);
    assert_eq!(engine.lock().unwrap().patterns().total_visits, 2);
    assert!(errors.lock().unwrap().is_empty());

    // Nothing arrives once stopped, even with the route exhausted
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(sampler.state(), SamplerState::Stopped);
}
