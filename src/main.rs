//! Macron monitor: binary entrypoint.
//! Loads config, fills the reference article set, then follows the recent-changes
//! stream until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use macron_monitor::alerts::{AlertDocument, AlertSink};
use macron_monitor::articles::{spawn_refresher, ArticleCache, PetscanSource, TitleSource};
use macron_monitor::config::MonitorConfig;
use macron_monitor::detectors::{
    DetectorChain, MaoriWordDetector, RemovedMacronDetector, UnmacronedLinkDetector,
};
use macron_monitor::metrics::{self, Metrics};
use macron_monitor::monitor::Monitor;
use macron_monitor::stream::{EventStreamSource, StreamFilter};
use macron_monitor::wiki::{build_http_client, WikiClient};

/// Compact human-readable logs by default; `LOG_FORMAT=json` for log shippers.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("macron_monitor=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = MonitorConfig::load().context("loading configuration")?;
    let policy = cfg.link_pipe_policy()?;
    if cfg.access_token.is_none() {
        warn!("no WIKI_ACCESS_TOKEN configured; alert pages cannot be edited");
    }

    let exporter = Metrics::init()?;

    let http = build_http_client(&cfg.user_agent)?;
    let wiki = WikiClient::new(http.clone(), &cfg.wiki_api_url, cfg.http_timeout())
        .with_access_token(cfg.access_token.clone());

    // --- Reference article set (fatal if it cannot be filled) ---
    let titles: Arc<dyn TitleSource> = Arc::new(PetscanSource::new(
        &cfg.petscan_query_url,
        http.clone(),
        cfg.http_timeout(),
    ));
    let articles = Arc::new(
        ArticleCache::populate(titles.as_ref(), cfg.population_policy(), cfg.http_timeout())
            .await
            .context("populating reference articles")?,
    );
    info!(articles = articles.len(), "reference article set ready");
    let refresher = spawn_refresher(
        Arc::clone(&articles),
        Arc::clone(&titles),
        cfg.refresh_interval(),
        cfg.http_timeout(),
    );

    let addr = cfg.metrics_addr()?;
    let router = exporter.router(Arc::clone(&articles));
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(router, addr).await {
            error!(error = ?e, "metrics server stopped");
        }
    });

    // --- Detection pipeline ---
    let mut removed = RemovedMacronDetector::new(&cfg.macron_alert_page);
    if cfg.restrict_removed_to_articles {
        removed = removed.restricted_to(Arc::clone(&articles));
    }
    let chain = DetectorChain::default()
        .with(removed)
        .with(MaoriWordDetector::new(&cfg.word_alert_page))
        .with(
            UnmacronedLinkDetector::new(Arc::clone(&articles))
                .with_alert_page(&cfg.link_alert_page)
                .with_policy(policy),
        );

    let wiki = Arc::new(wiki);
    let document: Arc<dyn AlertDocument> = wiki.clone();
    let sink = AlertSink::new(document, cfg.http_timeout()).with_summary(&cfg.edit_summary);
    let monitor = Monitor::new(wiki, chain, sink)
        .with_filter(StreamFilter::new(&cfg.server_name))
        .with_diff_limits(cfg.http_timeout(), cfg.request_retry());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "cannot listen for interrupts");
                // keep the sender alive so the monitor is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    let mut source = EventStreamSource::new(http, &cfg.stream_url, cfg.http_timeout());
    let outcome = monitor.run(&mut source, shutdown_rx).await;

    refresher.shutdown().await;
    let stats = outcome?;
    info!(
        processed = stats.processed,
        detections = stats.detections,
        "macron monitor exited"
    );
    Ok(())
}
