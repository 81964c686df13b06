use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde_json::json;

use crate::articles::{ArticleCache, CacheState};

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register help text for every metric the monitor emits. Idempotent.
pub fn describe() {
    DESCRIBED.get_or_init(|| {
        describe_histogram!(
            "change_processing_seconds",
            Unit::Seconds,
            "Time from accepting an edit to filing its reports"
        );
        describe_gauge!(
            "change_stream_lag_seconds",
            Unit::Seconds,
            "Age of the most recent edit when it was picked up"
        );
        describe_counter!(
            "suspicious_edits_detected",
            "Reports produced, labelled by detector"
        );
        describe_counter!("changes_processed_total", "Edits diffed and checked");
        describe_counter!(
            "changes_dropped_total",
            "Records skipped (malformed record or unfetchable diff)"
        );
        describe_counter!("detector_failures_total", "Detector panics caught by the chain");
        describe_counter!("alert_write_failures_total", "Alerts that could not be written");
        describe_gauge!("reference_articles", "Titles in the reference article set");
        describe_counter!(
            "reference_refresh_failures_total",
            "Failed or timed-out reference set refreshes"
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe();
        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus exposition format plus a `/healthz` probe
    /// reporting the reference set state.
    pub fn router(&self, articles: Arc<ArticleCache>) -> Router {
        router(self.handle.clone(), articles)
    }
}

pub fn router(handle: PrometheusHandle, articles: Arc<ArticleCache>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route(
            "/healthz",
            get(move || {
                let a = Arc::clone(&articles);
                async move {
                    let state = match a.state() {
                        CacheState::Initializing => "initializing",
                        CacheState::Ready => "ready",
                        CacheState::Refreshing => "refreshing",
                    };
                    Json(json!({ "articles": a.len(), "state": state }))
                }
            }),
        )
}

/// Serve `router` until the process exits.
pub async fn serve(router: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    tracing::info!(target: "metrics", %addr, "serving /metrics");
    axum::serve(listener, router)
        .await
        .context("metrics server")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn serves_metrics_and_health() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let articles = Arc::new(ArticleCache::from_titles(["Kākāpō", "Whānau"]));
        let app = router(recorder.handle(), articles);

        let res = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), 200);

        let res = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["state"], "ready");
        assert_eq!(v["articles"], 2);
    }
}
