//! Scanner — the background driver.
//!
//! One long-lived task, three independent wall-clock cadences: sentinel
//! scans, lineage ingest, and rediscovery. Within a cycle, tables are
//! inspected by a bounded worker pool; all sentinel work for one table is
//! serial, and a table's anomalies flow through the orchestrator before its
//! scan counts as complete. No failure aborts the loop.

use crate::connector::ConnectorFactory;
use crate::crypto::UriCipher;
use crate::investigator::Investigator;
use crate::lineage::LineageService;
use crate::notifier::Notifier;
use crate::orchestrator::Orchestrator;
use crate::sentinel::{FreshnessSentinel, SchemaSentinel};
use crate::store::Store;
use aegis_core::{CheckType, Connection, MonitoredTable, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub scan_interval: Duration,
    pub lineage_refresh_interval: Duration,
    pub rediscovery_interval: Duration,
    /// Concurrent table inspections per cycle.
    pub worker_count: usize,
    /// How far back each lineage ingest looks.
    pub query_log_window: Duration,
    pub query_log_limit: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            scan_interval: Duration::from_secs(300),
            lineage_refresh_interval: Duration::from_secs(3600),
            rediscovery_interval: Duration::from_secs(86400),
            worker_count: 4,
            query_log_window: Duration::from_secs(2 * 3600),
            query_log_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub tables_scanned: usize,
    pub anomalies_found: usize,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct Scanner {
    store: Arc<Store>,
    cipher: UriCipher,
    factory: Arc<dyn ConnectorFactory>,
    orchestrator: Arc<Orchestrator>,
    lineage: Arc<LineageService>,
    investigator: Arc<Investigator>,
    notifier: Arc<Notifier>,
    config: ScannerConfig,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        cipher: UriCipher,
        factory: Arc<dyn ConnectorFactory>,
        orchestrator: Arc<Orchestrator>,
        lineage: Arc<LineageService>,
        investigator: Arc<Investigator>,
        notifier: Arc<Notifier>,
        config: ScannerConfig,
    ) -> Self {
        Scanner {
            store,
            cipher,
            factory,
            orchestrator,
            lineage,
            investigator,
            notifier,
            config,
        }
    }

    /// Run until the shutdown signal flips. Each cadence is a wall-clock
    /// deadline, not a tick: a slow cycle delays its own next run, never the
    /// other cadences.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_secs = self.config.scan_interval.as_secs(),
            lineage_secs = self.config.lineage_refresh_interval.as_secs(),
            rediscovery_secs = self.config.rediscovery_interval.as_secs(),
            "scanner started"
        );

        let mut next_scan = Instant::now();
        let mut next_lineage = Instant::now();
        let mut next_rediscovery = Instant::now() + self.config.rediscovery_interval;

        loop {
            let next_deadline = next_scan.min(next_lineage).min(next_rediscovery);
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(next_deadline) => {}
            }

            let now = Instant::now();
            if now >= next_scan {
                if let Err(e) = self.run_scan_cycle().await {
                    error!(error = %e, "scan cycle failed");
                }
                next_scan = Instant::now() + self.config.scan_interval;
            }
            if now >= next_lineage {
                if let Err(e) = self.run_lineage_refresh().await {
                    error!(error = %e, "lineage refresh failed");
                }
                next_lineage = Instant::now() + self.config.lineage_refresh_interval;
            }
            if now >= next_rediscovery {
                if let Err(e) = self.run_rediscovery().await {
                    error!(error = %e, "rediscovery failed");
                }
                next_rediscovery = Instant::now() + self.config.rediscovery_interval;
            }
        }

        info!("scanner stopped");
    }

    /// One full scan cycle across every active connection. Also used by the
    /// manual trigger endpoint.
    pub async fn run_scan_cycle(&self) -> Result<CycleSummary> {
        let started = Instant::now();
        let mut summary = CycleSummary::default();

        for connection in self.store.active_connections()? {
            match self.scan_connection(&connection).await {
                Ok((tables, anomalies)) => {
                    summary.tables_scanned += tables;
                    summary.anomalies_found += anomalies;
                }
                Err(e) => {
                    warn!(connection = %connection.name, error = %e, "connection scan skipped");
                }
            }
        }

        self.retry_stalled_incidents().await;

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            tables = summary.tables_scanned,
            anomalies = summary.anomalies_found,
            duration_ms = summary.duration_ms,
            "scan cycle complete"
        );
        self.notifier.scan_completed(
            summary.tables_scanned,
            summary.anomalies_found,
            summary.duration_ms,
        );
        Ok(summary)
    }

    async fn scan_connection(&self, connection: &Connection) -> Result<(usize, usize)> {
        let uri = self.cipher.decrypt(&connection.uri)?;
        let connector: Arc<dyn crate::connector::WarehouseConnector> =
            Arc::from(self.factory.connect(connection.dialect, &uri).await?);

        let tables = match self.store.tables_for_connection(connection.id) {
            Ok(tables) => tables,
            Err(e) => {
                connector.dispose().await;
                return Err(e);
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.worker_count.max(1)));
        let mut workers: JoinSet<usize> = JoinSet::new();
        let table_count = tables.len();

        for table in tables {
            let permit_source = semaphore.clone();
            let scanner = self.clone();
            let connector = connector.clone();
            workers.spawn(async move {
                let _permit = permit_source
                    .acquire()
                    .await
                    .expect("semaphore never closes");
                scanner.scan_table(&table, connector.as_ref()).await
            });
        }

        let mut anomalies = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(found) => anomalies += found,
                Err(e) => error!(error = %e, "table scan worker panicked"),
            }
        }

        connector.dispose().await;
        Ok((table_count, anomalies))
    }

    /// All sentinel work for one table, in order. Returns how many anomalies
    /// were detected and routed.
    async fn scan_table(
        &self,
        table: &MonitoredTable,
        connector: &dyn crate::connector::WarehouseConnector,
    ) -> usize {
        let fqn = table.fully_qualified_name();
        let mut found = 0;

        if table.has_check(CheckType::Schema) {
            match SchemaSentinel.inspect(table, connector, &self.store).await {
                Ok(Some(anomaly)) => {
                    found += 1;
                    self.notifier.anomaly_detected(
                        anomaly.id,
                        &fqn,
                        anomaly.anomaly_type.as_str(),
                    );
                    if let Err(e) = self.orchestrator.handle_anomaly(&anomaly).await {
                        error!(table = %fqn, error = %e, "failed to route schema anomaly");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(table = %fqn, error = %e, "schema inspection skipped"),
            }
        }

        if table.has_check(CheckType::Freshness) {
            match FreshnessSentinel.inspect(table, connector, &self.store).await {
                Ok(Some(anomaly)) => {
                    found += 1;
                    self.notifier.anomaly_detected(
                        anomaly.id,
                        &fqn,
                        anomaly.anomaly_type.as_str(),
                    );
                    if let Err(e) = self.orchestrator.handle_anomaly(&anomaly).await {
                        error!(table = %fqn, error = %e, "failed to route freshness anomaly");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(table = %fqn, error = %e, "freshness inspection skipped"),
            }
        }

        found
    }

    /// Incidents whose diagnosis failed earlier stay in `investigating`;
    /// re-route their originating anomaly so the pipeline retries them.
    async fn retry_stalled_incidents(&self) {
        let stalled = match self.store.incidents_awaiting_diagnosis() {
            Ok(stalled) => stalled,
            Err(e) => {
                error!(error = %e, "could not list stalled incidents");
                return;
            }
        };

        for incident in stalled {
            if incident.diagnosis.is_some() {
                continue;
            }
            match self.store.get_anomaly(incident.anomaly_id) {
                Ok(Some(anomaly)) => {
                    if let Err(e) = self.orchestrator.handle_anomaly(&anomaly).await {
                        warn!(incident_id = incident.id, error = %e, "diagnosis retry failed");
                    }
                }
                Ok(None) => {
                    warn!(incident_id = incident.id, "originating anomaly missing");
                }
                Err(e) => error!(error = %e, "could not load anomaly for retry"),
            }
        }
    }

    /// Ingest query logs from every active connection.
    pub async fn run_lineage_refresh(&self) -> Result<usize> {
        let since = Utc::now()
            - ChronoDuration::from_std(self.config.query_log_window)
                .unwrap_or_else(|_| ChronoDuration::hours(2));
        let mut total = 0;

        for connection in self.store.active_connections()? {
            let uri = match self.cipher.decrypt(&connection.uri) {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(connection = %connection.name, error = %e, "uri decrypt failed");
                    continue;
                }
            };
            let connector = match self.factory.connect(connection.dialect, &uri).await {
                Ok(connector) => connector,
                Err(e) => {
                    warn!(connection = %connection.name, error = %e, "connect failed");
                    continue;
                }
            };

            match self
                .lineage
                .ingest(connector.as_ref(), since, self.config.query_log_limit)
                .await
            {
                Ok(edges) => total += edges,
                Err(e) => {
                    warn!(connection = %connection.name, error = %e, "lineage ingest skipped")
                }
            }
            connector.dispose().await;
        }

        info!(edges = total, "lineage refresh complete");
        Ok(total)
    }

    /// Delta-only rediscovery across active connections.
    pub async fn run_rediscovery(&self) -> Result<()> {
        for connection in self.store.active_connections()? {
            let uri = match self.cipher.decrypt(&connection.uri) {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(connection = %connection.name, error = %e, "uri decrypt failed");
                    continue;
                }
            };
            let connector = match self.factory.connect(connection.dialect, &uri).await {
                Ok(connector) => connector,
                Err(e) => {
                    warn!(connection = %connection.name, error = %e, "connect failed");
                    continue;
                }
            };

            match self
                .investigator
                .rediscover(connector.as_ref(), connection.id)
                .await
            {
                Ok(deltas) => {
                    info!(
                        connection = %connection.name,
                        deltas = deltas.len(),
                        "rediscovery complete"
                    );
                    self.notifier.discovery_update(connection.id, deltas.len());
                }
                Err(e) => warn!(connection = %connection.name, error = %e, "rediscovery skipped"),
            }
            connector.dispose().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architect::Architect;
    use crate::executor::Executor;
    use crate::testkit::Warehouse;
    use aegis_core::{
        AegisError, AnomalyType, ColumnDef, Dialect, EventKind, IncidentStatus, Severity,
    };
    use async_trait::async_trait;

    struct FixedFactory {
        warehouse: std::sync::Mutex<Option<Warehouse>>,
    }

    impl FixedFactory {
        fn new(warehouse: Warehouse) -> Self {
            FixedFactory {
                warehouse: std::sync::Mutex::new(Some(warehouse)),
            }
        }
    }

    #[async_trait]
    impl ConnectorFactory for FixedFactory {
        async fn connect(
            &self,
            _dialect: Dialect,
            _uri: &str,
        ) -> Result<Box<dyn crate::connector::WarehouseConnector>> {
            let warehouse = self
                .warehouse
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| AegisError::Connectivity("factory exhausted".to_string()))?;
            Ok(Box::new(warehouse))
        }
    }

    fn col(name: &str, ty: &str, ordinal: u32) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: ty.to_string(),
            nullable: true,
            ordinal,
        }
    }

    fn scanner_with(store: Arc<Store>, warehouse: Warehouse) -> (Scanner, Arc<Notifier>) {
        let cipher = UriCipher::from_base64(&UriCipher::generate_key()).unwrap();
        let lineage = Arc::new(LineageService::new(store.clone()));
        let notifier = Arc::new(Notifier::new());
        let architect = Architect::new(store.clone(), lineage.clone(), None);
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            architect,
            Executor,
            notifier.clone(),
        ));
        let investigator = Arc::new(Investigator::new(store.clone(), lineage.clone(), None));
        let scanner = Scanner::new(
            store,
            cipher,
            Arc::new(FixedFactory::new(warehouse)),
            orchestrator,
            lineage,
            investigator,
            notifier.clone(),
            ScannerConfig::default(),
        );
        (scanner, notifier)
    }

    fn sealed_connection(store: &Store, scanner: &Scanner) -> aegis_core::Connection {
        let sealed = scanner.cipher.encrypt("postgresql://wh").unwrap();
        store
            .insert_connection("wh", Dialect::Postgres, &sealed, true)
            .unwrap()
    }

    #[tokio::test]
    async fn first_cycle_baselines_then_second_detects_drift() {
        let store = Arc::new(Store::open_in_memory().unwrap());

        // Cycle 1: establish the baseline.
        let warehouse = Warehouse::new().with_table(
            "analytics",
            "orders",
            vec![col("id", "INT", 1), col("price", "FLOAT", 2)],
        );
        let (scanner, _) = scanner_with(store.clone(), warehouse);
        let connection = sealed_connection(&store, &scanner);
        let table = store
            .insert_table(
                connection.id,
                "analytics",
                "orders",
                &[CheckType::Schema],
                None,
            )
            .unwrap();

        let summary = scanner.run_scan_cycle().await.unwrap();
        assert_eq!(summary.tables_scanned, 1);
        assert_eq!(summary.anomalies_found, 0);
        assert_eq!(store.count_snapshots(table.id).unwrap(), 1);

        // Cycle 2: the price column changed type.
        let drifted = Warehouse::new().with_table(
            "analytics",
            "orders",
            vec![col("id", "INT", 1), col("price", "VARCHAR(255)", 2)],
        );
        let (scanner2, notifier) = scanner_with(store.clone(), drifted);
        let (_, mut rx) = notifier.subscribe(None);

        let summary = scanner2.run_scan_cycle().await.unwrap();
        assert_eq!(summary.anomalies_found, 1);

        let incident = store
            .find_active_incident(table.id, AnomalyType::SchemaDrift)
            .unwrap()
            .unwrap();
        assert_eq!(incident.status, IncidentStatus::PendingReview);
        assert_eq!(incident.severity, Severity::Critical);
        assert!(incident.report.is_some());

        let kinds: Vec<EventKind> = [
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
        ]
        .into();
        assert!(kinds.contains(&EventKind::AnomalyDetected));
        assert!(kinds.contains(&EventKind::IncidentCreated));
        assert!(kinds.contains(&EventKind::ScanCompleted));
    }

    #[tokio::test]
    async fn unreachable_warehouse_does_not_abort_the_cycle() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (scanner, _) = scanner_with(store.clone(), Warehouse::unreachable());
        let connection = sealed_connection(&store, &scanner);
        store
            .insert_table(
                connection.id,
                "analytics",
                "orders",
                &[CheckType::Schema],
                None,
            )
            .unwrap();

        let summary = scanner.run_scan_cycle().await.unwrap();
        // The table was visited but its inspection was skipped.
        assert_eq!(summary.anomalies_found, 0);
    }

    #[tokio::test]
    async fn lineage_refresh_ingests_query_log() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let warehouse = Warehouse::new().with_query(
            "INSERT INTO mart.daily SELECT * FROM stg.orders",
            Utc::now(),
        );
        let (scanner, _) = scanner_with(store.clone(), warehouse);
        sealed_connection(&store, &scanner);

        let edges = scanner.run_lineage_refresh().await.unwrap();
        assert_eq!(edges, 1);

        let lineage = LineageService::new(store);
        assert_eq!(lineage.blast_radius("stg.orders").unwrap().total, 1);
    }

    #[tokio::test]
    async fn rediscovery_broadcasts_delta_count() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let warehouse = Warehouse::new().with_table("public", "b", Vec::new());
        let (scanner, notifier) = scanner_with(store.clone(), warehouse);
        sealed_connection(&store, &scanner);
        let (_, mut rx) = notifier.subscribe(None);

        scanner.run_rediscovery().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::DiscoveryUpdate);
        assert_eq!(event.payload["total_deltas"], 1);
    }
}
