//! Engine assembly and lifecycle.
//!
//! [`Engine::start`] opens the store, restores persisted state, wires
//! the components together, and spawns the background tasks. The handle
//! then exposes the intents an application shell drives (alerts, route
//! computation and selection, identity actions) plus snapshots of every
//! component. [`Engine::shutdown`] signals the tasks and joins them
//! under a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::alert::{AlertConfig, AlertMachine, AlertStats};
use crate::capture::{CaptureConfig, CaptureStats, TelemetryCapture};
use crate::domain::{
    DeadLetter, DeviceId, DeviceTelemetrySample, DigitalIdentity, EmergencyAlert, GeoPoint,
    IdentityId, RiskObservation, RouteBatch, RouteCandidate, RouteId, TouristId, TravelerForm,
    ZoneStatus,
};
use crate::identity::{IdentityConfig, IdentityRegistry};
use crate::infra::{
    BackoffPolicy, ComponentHealth, ConnectivitySignal, EngineError, HealthSnapshot,
    IdentityIssuer, LocationProvider, RemoteAuthority, Result, RiskSignalSource, RoutePlanner,
    SqliteStore, TelemetrySource, DEFAULT_MAX_QUEUE_DEPTH,
};
use crate::route::{RouteConfig, RouteScorer};
use crate::sync::{SyncConfig, SyncEngine, SyncEngineState, SyncStats};
use crate::zone::{ZoneConfig, ZoneMonitor, ZoneStats};

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database path.
    pub db_path: String,

    /// Identifier of the capturing device.
    pub device_id: DeviceId,

    /// Tourist this device is bound to.
    pub tourist_id: TouristId,

    /// Durable queue capacity.
    pub max_queue_depth: u64,

    /// Upper bound on one alert-update subscription attempt.
    pub update_subscribe_timeout: Duration,

    /// How long shutdown waits for each task before aborting it.
    pub shutdown_grace: Duration,

    pub alert: AlertConfig,
    pub sync: SyncConfig,
    pub zone: ZoneConfig,
    pub route: RouteConfig,
    pub capture: CaptureConfig,
    pub identity: IdentityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "fieldguard.db".to_string(),
            device_id: DeviceId::new("DEV-0000"),
            tourist_id: TouristId::new(),
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            update_subscribe_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            alert: AlertConfig::default(),
            sync: SyncConfig::default(),
            zone: ZoneConfig::default(),
            route: RouteConfig::default(),
            capture: CaptureConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `FIELDGUARD_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FIELDGUARD_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(id) = std::env::var("FIELDGUARD_DEVICE_ID") {
            config.device_id = DeviceId::new(id);
        }
        if let Ok(raw) = std::env::var("FIELDGUARD_TOURIST_ID") {
            let id = raw.parse::<uuid::Uuid>().map_err(|e| {
                EngineError::Configuration(format!("FIELDGUARD_TOURIST_ID: {e}"))
            })?;
            config.tourist_id = TouristId::from_uuid(id);
        }
        if let Some(secs) = parse_var::<u64>("FIELDGUARD_CAPTURE_INTERVAL_SECS") {
            config.capture.interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<u32>("FIELDGUARD_SYNC_BATCH_SIZE") {
            config.sync.batch_size = size;
        }
        if let Some(secs) = parse_var::<u64>("FIELDGUARD_ZONE_PERIOD_SECS") {
            config.zone.period = Duration::from_secs(secs);
        }
        if let Some(depth) = parse_var::<u64>("FIELDGUARD_MAX_QUEUE_DEPTH") {
            config.max_queue_depth = depth;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Everything the engine cannot own: hardware, transport, and external
/// services, all behind trait objects.
pub struct Collaborators {
    pub authority: Arc<dyn RemoteAuthority>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub location: Arc<dyn LocationProvider>,
    pub connectivity: Arc<dyn ConnectivitySignal>,
    pub signals: Arc<dyn RiskSignalSource>,
    pub planner: Arc<dyn RoutePlanner>,
    pub issuer: Arc<dyn IdentityIssuer>,
}

/// The assembled engine.
pub struct Engine {
    tourist_id: TouristId,
    store: SqliteStore,
    alerts: AlertMachine,
    zones: ZoneMonitor,
    routes: RouteScorer,
    identities: IdentityRegistry,
    sync: SyncEngine,
    capture: TelemetryCapture,
    shutdown: watch::Sender<bool>,
    shutdown_grace: Duration,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    health: Arc<RwLock<HealthSnapshot>>,
}

impl Engine {
    /// Open the store, restore persisted state, and spawn the
    /// background tasks.
    pub async fn start(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        info!(
            db_path = %config.db_path,
            device_id = %config.device_id,
            tourist_id = %config.tourist_id,
            "starting fieldguard engine"
        );

        let store = SqliteStore::from_path(&config.db_path)
            .await?
            .with_max_queue_depth(config.max_queue_depth);
        store.initialize().await?;

        let alerts = AlertMachine::new(
            config.alert,
            config.tourist_id,
            store.clone(),
            collaborators.location.clone(),
        );
        if let Some(alert) = alerts.restore().await? {
            info!(
                alert_id = %alert.alert_id,
                status = %alert.status,
                "restored outstanding alert"
            );
        }

        let zones = ZoneMonitor::new(config.zone, store.clone(), collaborators.signals.clone());
        zones.restore().await?;

        let routes = RouteScorer::new(config.route, collaborators.planner.clone(), Vec::new());
        let identities =
            IdentityRegistry::new(config.identity, store.clone(), collaborators.issuer.clone());
        let sync = SyncEngine::new(
            config.sync,
            store.clone(),
            collaborators.authority.clone(),
            collaborators.connectivity.subscribe(),
        );
        let capture = TelemetryCapture::new(
            config.capture,
            config.device_id.clone(),
            store.clone(),
            collaborators.telemetry.clone(),
            zones.clone(),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let health = Arc::new(RwLock::new(HealthSnapshot {
            capture: ComponentHealth::Running,
            sync: ComponentHealth::Running,
            zone: ComponentHealth::Running,
            alert_updates: ComponentHealth::Running,
        }));

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        tasks.push(("capture", {
            let capture = capture.clone();
            let health = health.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let outcome = capture.run(rx).await;
                health.write().await.capture = match outcome {
                    Ok(()) => ComponentHealth::Stopped,
                    Err(e) => {
                        error!(error = %e, "capture task failed");
                        ComponentHealth::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
            })
        }));

        tasks.push(("sync", {
            let sync = sync.clone();
            let health = health.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                sync.run(rx).await;
                health.write().await.sync = ComponentHealth::Stopped;
            })
        }));

        tasks.push(("zone", {
            let zones = zones.clone();
            let health = health.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                zones.run(rx).await;
                health.write().await.zone = ComponentHealth::Stopped;
            })
        }));

        tasks.push(("alert-updates", {
            let authority = collaborators.authority.clone();
            let machine = alerts.clone();
            let health = health.clone();
            let rx = shutdown_rx.clone();
            let tourist_id = config.tourist_id;
            let subscribe_timeout = config.update_subscribe_timeout;
            tokio::spawn(async move {
                follow_alert_updates(authority, machine, tourist_id, subscribe_timeout, rx).await;
                health.write().await.alert_updates = ComponentHealth::Stopped;
            })
        }));

        Ok(Self {
            tourist_id: config.tourist_id,
            store,
            alerts,
            zones,
            routes,
            identities,
            sync,
            capture,
            shutdown,
            shutdown_grace: config.shutdown_grace,
            tasks: Mutex::new(tasks),
            health,
        })
    }

    pub fn tourist_id(&self) -> TouristId {
        self.tourist_id
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // --- alerts ---

    pub async fn raise_alert(&self) -> Result<EmergencyAlert> {
        self.alerts.raise().await
    }

    pub async fn cancel_alert(&self) -> Result<EmergencyAlert> {
        self.alerts.cancel().await
    }

    pub async fn resolve_alert(&self) -> Result<EmergencyAlert> {
        self.alerts.resolve().await
    }

    pub async fn current_alert(&self) -> Option<EmergencyAlert> {
        self.alerts.current().await
    }

    pub fn subscribe_alerts(&self) -> watch::Receiver<Option<EmergencyAlert>> {
        self.alerts.subscribe()
    }

    pub async fn alert_stats(&self) -> AlertStats {
        self.alerts.stats().await
    }

    // --- zones ---

    pub async fn zone_status(&self) -> Option<ZoneStatus> {
        self.zones.current().await
    }

    pub fn subscribe_zone(&self) -> watch::Receiver<Option<ZoneStatus>> {
        self.zones.subscribe()
    }

    pub async fn zone_stats(&self) -> ZoneStats {
        self.zones.stats().await
    }

    // --- routes ---

    pub async fn compute_routes(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteBatch> {
        self.routes.compute_routes(origin, destination).await
    }

    pub async fn select_route(&self, route_id: RouteId) -> Result<RouteCandidate> {
        self.routes.select_route(route_id).await
    }

    pub async fn current_routes(&self) -> Option<RouteBatch> {
        self.routes.current_batch().await
    }

    pub fn subscribe_routes(&self) -> watch::Receiver<Option<RouteBatch>> {
        self.routes.subscribe()
    }

    pub async fn update_observations(&self, observations: Vec<RiskObservation>) {
        self.routes.update_observations(observations).await
    }

    // --- identity ---

    pub async fn register_identity(&self, form: &TravelerForm) -> Result<DigitalIdentity> {
        self.identities.register(self.tourist_id, form).await
    }

    pub async fn verify_identity(&self, identity_id: &IdentityId) -> Result<DigitalIdentity> {
        self.identities.verify(identity_id).await
    }

    pub async fn flag_identity(&self, identity_id: &IdentityId) -> Result<DigitalIdentity> {
        self.identities.flag(identity_id).await
    }

    pub async fn override_identity_verification(
        &self,
        identity_id: &IdentityId,
    ) -> Result<DigitalIdentity> {
        self.identities.verify_override(identity_id).await
    }

    pub async fn current_identity(&self) -> Result<Option<DigitalIdentity>> {
        self.identities.current(&self.tourist_id).await
    }

    pub async fn identity_history(&self) -> Result<Vec<DigitalIdentity>> {
        self.identities.history(&self.tourist_id).await
    }

    // --- sync and capture ---

    pub fn sync_state(&self) -> SyncEngineState {
        self.sync.state()
    }

    pub fn subscribe_sync_state(&self) -> watch::Receiver<SyncEngineState> {
        self.sync.subscribe_state()
    }

    pub async fn sync_stats(&self) -> SyncStats {
        self.sync.stats().await
    }

    pub async fn capture_stats(&self) -> CaptureStats {
        self.capture.stats().await
    }

    pub fn latest_sample(&self) -> Option<DeviceTelemetrySample> {
        self.capture.latest()
    }

    pub async fn queue_depth(&self) -> Result<u64> {
        self.store.queue_depth().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters().await
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.health.read().await.clone()
    }

    /// Signal every task and join them. A task that outlives the grace
    /// period is aborted.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        let _ = self.shutdown.send(true);

        let mut tasks = self.tasks.lock().await;
        for (name, mut handle) in tasks.drain(..) {
            match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "task did not stop within grace, aborting");
                    handle.abort();
                }
            }
        }
        info!("engine stopped");
    }
}

/// Follow the authority's alert update stream, re-subscribing with
/// backoff whenever it drops.
async fn follow_alert_updates(
    authority: Arc<dyn RemoteAuthority>,
    machine: AlertMachine,
    tourist_id: TouristId,
    subscribe_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let backoff = BackoffPolicy::default();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let subscribed = tokio::select! {
            result = tokio::time::timeout(
                subscribe_timeout,
                authority.subscribe_alert_updates(&tourist_id),
            ) => result,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let mut stream = match subscribed {
            Ok(Ok(stream)) => {
                attempt = 0;
                info!("alert update stream open");
                stream
            }
            Ok(Err(e)) => {
                warn!(error = %e, attempt, "alert update subscription failed");
                if !delay_or_shutdown(&mut shutdown, backoff.delay_for_attempt(attempt)).await {
                    break;
                }
                attempt = attempt.saturating_add(1);
                continue;
            }
            Err(_) => {
                warn!(attempt, "alert update subscription timed out");
                if !delay_or_shutdown(&mut shutdown, backoff.delay_for_attempt(attempt)).await {
                    break;
                }
                attempt = attempt.saturating_add(1);
                continue;
            }
        };

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(update) => {
                        if let Err(e) = machine.apply_remote(update).await {
                            warn!(error = %e, "remote alert update not applied");
                        }
                    }
                    None => {
                        info!("alert update stream ended, re-subscribing");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
        if !delay_or_shutdown(&mut shutdown, backoff.delay_for_attempt(0)).await {
            break;
        }
    }
    info!("alert update follower stopped");
}

/// Sleep unless shutdown arrives first. Returns `false` when the caller
/// should stop.
async fn delay_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

/// Install the process-wide tracing subscriber. `RUST_LOG` controls the
/// filter; defaults to `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertStatus, Connectivity, SubmitOutcome, SyncEnvelope};
    use crate::infra::{AlertUpdateStream, MockIdentityIssuer, SharedConnectivity};
    use crate::route::OffsetPlanner;
    use crate::sim::{sample_signals, SimulatedTelemetrySource, StaticLocation, StaticSignalSource};
    use async_trait::async_trait;

    const START: GeoPoint = GeoPoint {
        lat: 27.1751,
        lng: 78.0421,
    };

    fn valid_form() -> TravelerForm {
        TravelerForm {
            first_name: "Asha".into(),
            last_name: "Verma".into(),
            email: "asha.verma@example.com".into(),
            phone: "+1 212 555 0148".into(),
            nationality: "India".into(),
            passport_number: "P4558821".into(),
            emergency_contact_name: "Ravi Verma".into(),
            emergency_contact_phone: "+91 98100 22334".into(),
            destination: "Agra".into(),
            trip_purpose: "Two week sightseeing visit".into(),
        }
    }

    struct AcceptAllAuthority;

    #[async_trait]
    impl RemoteAuthority for AcceptAllAuthority {
        async fn submit_envelope(&self, _envelope: &SyncEnvelope) -> Result<SubmitOutcome> {
            Ok(SubmitOutcome::Accepted)
        }

        async fn subscribe_alert_updates(
            &self,
            _tourist_id: &TouristId,
        ) -> Result<AlertUpdateStream> {
            Ok(Box::pin(tokio_stream::pending()))
        }
    }

    fn sim_collaborators(connectivity: &SharedConnectivity) -> Collaborators {
        let mut issuer = MockIdentityIssuer::new();
        issuer
            .expect_issue()
            .returning(|_| Ok(IdentityId::new("did:fg:e2e")));
        Collaborators {
            authority: Arc::new(AcceptAllAuthority),
            telemetry: Arc::new(SimulatedTelemetrySource::new(11, START)),
            location: StaticLocation::shared(START),
            connectivity: Arc::new(connectivity.clone()),
            signals: Arc::new(StaticSignalSource::new(sample_signals(START))),
            planner: Arc::new(OffsetPlanner::default()),
            issuer: Arc::new(issuer),
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> EngineConfig {
        let db_path = dir
            .path()
            .join("fieldguard.db")
            .to_string_lossy()
            .into_owned();
        EngineConfig {
            db_path,
            device_id: DeviceId::new("SIM-0001"),
            ..EngineConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn engine_runs_the_full_loop() {
        let dir = tempfile::tempdir().unwrap();
        let connectivity = SharedConnectivity::new(Connectivity::Online);
        let engine = Engine::start(test_config(&dir), sim_collaborators(&connectivity))
            .await
            .unwrap();

        assert!(engine.health().await.all_running());

        // The first capture tick fires immediately; let the loop run a
        // couple of capture-and-deliver cycles.
        for _ in 0..5_000 {
            if engine.sync_stats().await.delivered >= 2 && engine.zone_status().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(engine.latest_sample().is_some());
        assert!(engine.capture_stats().await.captured >= 2);
        assert!(engine.sync_stats().await.delivered >= 2);
        assert!(engine.zone_status().await.is_some());

        let mut alerts = engine.subscribe_alerts();
        let alert = engine.raise_alert().await.unwrap();
        assert_eq!(alert.status, AlertStatus::Pending);
        let active = alerts
            .wait_for(|a| matches!(a, Some(a) if a.status == AlertStatus::Active))
            .await
            .unwrap()
            .clone()
            .unwrap();
        assert_eq!(active.alert_id, alert.alert_id);
        let resolved = engine.resolve_alert().await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);

        let batch = engine.compute_routes(START, GeoPoint::new(27.19, 78.05)).await.unwrap();
        assert_eq!(batch.candidates.len(), 3);
        let second = batch.candidates[1].route_id;
        let picked = engine.select_route(second).await.unwrap();
        assert_eq!(picked.route_id, second);

        let identity = engine.register_identity(&valid_form()).await.unwrap();
        assert_eq!(engine.current_identity().await.unwrap().unwrap(), identity);

        // Real time again so in-flight writes land inside the grace window.
        tokio::time::resume();
        engine.shutdown().await;
        let health = engine.health().await;
        assert_eq!(health.capture, ComponentHealth::Stopped);
        assert_eq!(health.sync, ComponentHealth::Stopped);
        assert_eq!(health.zone, ComponentHealth::Stopped);
        assert_eq!(health.alert_updates, ComponentHealth::Stopped);
    }

    #[tokio::test]
    async fn from_env_overrides_and_validates() {
        std::env::set_var("FIELDGUARD_DB_PATH", "/tmp/fieldguard-test.db");
        std::env::set_var("FIELDGUARD_SYNC_BATCH_SIZE", "25");
        std::env::set_var("FIELDGUARD_TOURIST_ID", "not-a-uuid");

        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));

        let tourist = TouristId::new();
        std::env::set_var("FIELDGUARD_TOURIST_ID", tourist.to_string());
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.db_path, "/tmp/fieldguard-test.db");
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.tourist_id, tourist);

        std::env::remove_var("FIELDGUARD_DB_PATH");
        std::env::remove_var("FIELDGUARD_SYNC_BATCH_SIZE");
        std::env::remove_var("FIELDGUARD_TOURIST_ID");
    }
}
