//! One extraction run: extract, archive, normalize, load.

use tracing::{debug, info, warn};

use crate::config::LineNameMap;
use crate::error::PipelineError;
use crate::extract::{Extractor, LineRouteQuery, RawPayload, select_lines};
use crate::fetch::HttpClient;
use crate::load::Loader;
use crate::normalize::resolve::ExactNameResolver;
use crate::normalize::{Diagnostics, Normalized, normalize_arrivals, normalize_routes};
use crate::report::RunReport;
use crate::rows::{ArrivalRow, CanonicalRow, RouteRow};
use crate::snapshot::{SnapshotSink, archive_payload};

/// Everything a run produced: the report, the accepted rows and the diagnostics.
#[derive(Debug, Clone)]
pub struct RunOutput<R> {
    pub report: RunReport,
    pub rows: Vec<R>,
    pub diagnostics: Diagnostics,
}

/// Holds the run's API session and warehouse handle; requests are issued one
/// at a time.
pub struct Pipeline<C> {
    extractor: Extractor<C>,
    loader: Loader,
    names: LineNameMap,
    archive: Option<Box<dyn SnapshotSink>>,
}

impl<C: HttpClient> Pipeline<C> {
    pub fn new(extractor: Extractor<C>, loader: Loader, names: LineNameMap) -> Self {
        Self {
            extractor,
            loader,
            names,
            archive: None,
        }
    }

    /// Archives every raw payload to `sink` before it is normalized.
    pub fn with_archive(mut self, sink: Box<dyn SnapshotSink>) -> Self {
        self.archive = Some(sink);
        self
    }

    pub fn extractor(&self) -> &Extractor<C> {
        &self.extractor
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    fn resolver(&self) -> ExactNameResolver {
        ExactNameResolver::with_entries(self.names.iter())
    }

    async fn archive(&self, payload: &RawPayload) {
        let Some(sink) = &self.archive else {
            return;
        };
        if let Err(e) = archive_payload(sink.as_ref(), payload).await {
            warn!(error = %e, endpoint = %payload.fingerprint, "Failed to archive raw payload");
        }
    }

    async fn load<R>(
        &self,
        normalized: Normalized<R>,
        report: RunReport,
    ) -> Result<RunOutput<R>, PipelineError>
    where
        R: Clone + Into<CanonicalRow>,
    {
        let canonical: Vec<CanonicalRow> = normalized.rows.iter().cloned().map(Into::into).collect();
        let counts = self.loader.upsert(&canonical).await?;
        let report = report
            .with_diagnostics(normalized.diagnostics.counts())
            .with_load(counts);

        info!(
            kind = %report.kind,
            target = %report.target,
            fetched = report.fetched,
            accepted = report.accepted,
            diagnosed = report.diagnosed(),
            "Run complete"
        );

        Ok(RunOutput {
            report,
            rows: normalized.rows,
            diagnostics: normalized.diagnostics,
        })
    }

    /// Extracts, normalizes and loads the predictions for one stop point.
    #[tracing::instrument(skip(self))]
    pub async fn run_arrivals(
        &self,
        stop_point_id: &str,
    ) -> Result<RunOutput<ArrivalRow>, PipelineError> {
        let extraction = self.extractor.get_arrivals(stop_point_id).await?;
        self.archive(&extraction.payload).await;

        let normalized = normalize_arrivals(&extraction, &self.resolver());

        let mut report = RunReport::new("arrivals", stop_point_id);
        report.fetched = extraction.fetched();
        report.accepted = normalized.rows.len();
        self.load(normalized, report).await
    }

    /// Extracts the route catalogue, narrows it to the requested lines and loads it.
    ///
    /// Names of catalogue records that carry an id are added to the configured
    /// name map before null ids are resolved. Records that resolve to no line
    /// are normalized alongside the selection, so they are counted as unmapped.
    #[tracing::instrument(skip(self))]
    pub async fn run_routes(
        &self,
        query: &LineRouteQuery,
    ) -> Result<RunOutput<RouteRow>, PipelineError> {
        let catalogue = self.extractor.fetch_line_catalogue(query).await?;
        self.archive(&catalogue.payload).await;

        let resolver = self.resolver().learn_from(catalogue.raw_records());
        debug!(names = resolver.known_names(), "Line resolver ready");

        let selection = select_lines(&catalogue.records, query.requested_lines(), &resolver);
        let lines = selection.into_records();
        let normalized = normalize_routes(&lines, &catalogue.rejected, &resolver);

        let mut report = RunReport::new("line_routes", catalogue.payload.fingerprint.to_string());
        report.fetched = catalogue.fetched();
        report.accepted = normalized.rows.len();
        self.load(normalized, report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, LoadError};
    use crate::normalize::Diagnostic;
    use crate::fetch::scripted::ScriptedClient;
    use crate::fetch::{ApiClient, RetryPolicy};
    use crate::rows::{ARRIVALS_TABLE, ROUTES_TABLE};
    use crate::snapshot::DirSink;
    use serde_json::json;
    use std::time::Duration;

    async fn pipeline(script: Vec<serde_json::Value>) -> Pipeline<ScriptedClient> {
        let script = script.into_iter().map(ScriptedClient::ok_json).collect();
        let api = ApiClient::new(
            ScriptedClient::new(script),
            "https://api.example.com",
            RetryPolicy::with_retries(1, Duration::ZERO),
        );
        let loader = Loader::connect("sqlite::memory:").await.unwrap();
        loader.ensure_schema().await.unwrap();
        Pipeline::new(Extractor::new(api), loader, LineNameMap::default())
    }

    fn arrivals_json() -> serde_json::Value {
        let prediction = |vehicle: &str, expected: &str, tts: i64| {
            json!({
                "naptanId": "2420900042",
                "lineId": "185",
                "lineName": "185",
                "vehicleId": vehicle,
                "expectedArrival": expected,
                "destinationName": "Victoria",
                "timeToStation": tts
            })
        };
        json!([
            prediction("LX1", "2026-10-14T08:00:30Z", 30),
            prediction("LX2", "2026-10-14T07:59:55Z", -5),
            prediction("LX3", "2026-10-14T08:02:00Z", 120),
            prediction("LX4", "2026-10-14T08:00:45Z", 45),
            prediction("LX4", "2026-10-14T08:00:45Z", 45)
        ])
    }

    #[tokio::test]
    async fn test_run_arrivals_scenario() {
        let p = pipeline(vec![arrivals_json(), arrivals_json()]).await;

        let first = p.run_arrivals("2420900042").await.unwrap();
        assert_eq!(first.report.fetched, 5);
        assert_eq!(first.report.accepted, 3);
        assert_eq!(first.report.malformed, 1);
        assert_eq!(first.report.inserted, 3);

        let second = p.run_arrivals("2420900042").await.unwrap();
        assert_eq!(second.report.inserted, 0);
        assert_eq!(second.report.skipped, 3);
        assert_eq!(p.loader().count(ARRIVALS_TABLE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_routes_learns_names_from_catalogue() {
        let section = json!({"name": "A - B", "direction": "inbound", "serviceType": "Regular"});
        let night = json!({"name": "A - B", "direction": "inbound", "serviceType": "Night"});
        let p = pipeline(vec![json!([
            {"id": "central", "name": "Central", "routeSections": [section]},
            {"id": null, "name": "Central", "routeSections": [night]},
            {"id": "victoria", "name": "Victoria", "routeSections": [section]},
            {"id": null, "name": null, "routeSections": [section]}
        ])])
        .await;

        let out = p
            .run_routes(&LineRouteQuery::for_lines(["central"]))
            .await
            .unwrap();

        assert_eq!(out.report.fetched, 4);
        assert_eq!(out.rows.len(), 2);
        assert!(out.rows.iter().all(|r| r.line_id == "central"));
        assert_eq!(out.report.unmapped, 1);
        assert!(matches!(
            out.diagnostics.entries.as_slice(),
            [Diagnostic::Unmapped { index: 3, .. }]
        ));
        assert_eq!(p.loader().count(ROUTES_TABLE).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fatal() {
        let api = ApiClient::new(
            ScriptedClient::new(vec![ScriptedClient::status(403)]),
            "https://api.example.com",
            RetryPolicy::default(),
        );
        let loader = Loader::connect("sqlite::memory:").await.unwrap();
        loader.ensure_schema().await.unwrap();
        let p = Pipeline::new(Extractor::new(api), loader, LineNameMap::default());

        let err = p.run_arrivals("2420900042").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Fetch(FetchError::AuthenticationFailure { status: 403 })
        ));
    }

    #[tokio::test]
    async fn test_load_failure_is_fatal() {
        let p = pipeline(vec![arrivals_json()]).await;
        sqlx::query("DROP TABLE arrivals")
            .execute(p.loader().pool())
            .await
            .unwrap();

        let err = p.run_arrivals("2420900042").await.unwrap_err();
        match err {
            PipelineError::Load(LoadError::LoadFailure { pending_keys, .. }) => {
                assert_eq!(pending_keys.len(), 3)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_payload_archived_before_normalization() {
        let root = std::env::temp_dir().join("tfl_etl_test_pipeline_archive");
        let _ = std::fs::remove_dir_all(&root);
        let p = pipeline(vec![json!([{"naptanId": "2420900042", "timeToStation": -1}])])
            .await
            .with_archive(Box::new(DirSink::new(&root)));

        let out = p.run_arrivals("2420900042").await.unwrap();
        assert!(out.rows.is_empty());
        assert_eq!(out.report.malformed, 1);

        let archived = std::fs::read_dir(root.join("stoppoint-2420900042-arrivals"))
            .unwrap()
            .count();
        assert_eq!(archived, 1);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
