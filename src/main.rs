//! Grimoire daemon entry point.
//!
//! ```bash
//! sudo ./target/release/grimoire --enable-grimoire --grimoire-enforce
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use grimoire::alert::{AlertLog, AlertRecord};
use grimoire::config::{self, Config};
use grimoire::enforcement::{self, Mode};
use grimoire::engine::PatternEngine;
use grimoire::metadata::MetadataResolver;
use grimoire::metrics::{
    self, encode_metrics, ENFORCEMENTS, EVENTS_DROPPED, EVENTS_PROCESSED, MATCHES_EMITTED, TRACKS_ACTIVE,
    TRACKS_EVICTED,
};
use grimoire::oracle::OracleHandle;
use grimoire::patterns_builtin::PATTERNS;
use grimoire::startup;

struct ShutdownSummary {
    events_processed: u64,
    events_dropped: u64,
    tracks_evicted: u64,
    matches_emitted: u64,
    enforcements_succeeded: u64,
    enforcements_failed: u64,
    interrupted: bool,
}

#[tokio::main]
async fn main() {
    let config = config::parse_args();

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if !config.enabled {
        tracing::info!("grimoire disabled (pass --enable-grimoire to start)");
        std::process::exit(0);
    }

    if let Err(e) = startup::check_required_capabilities() {
        tracing::error!(error = %e, "refusing to start");
        std::process::exit(2);
    }

    match run(config).await {
        Ok(summary) => {
            tracing::info!(
                events_processed = summary.events_processed,
                events_dropped = summary.events_dropped,
                tracks_evicted = summary.tracks_evicted,
                matches_emitted = summary.matches_emitted,
                enforcements_succeeded = summary.enforcements_succeeded,
                enforcements_failed = summary.enforcements_failed,
                "grimoire stopped"
            );
            std::process::exit(if summary.interrupted { 130 } else { 0 });
        }
        Err(e) => {
            tracing::error!(error = %e, "grimoire exited with an error");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> Result<ShutdownSummary, Box<dyn std::error::Error + Send + Sync>> {
    metrics::init();

    let mode = if config.enforce { Mode::Enforce } else { Mode::Shadow };
    tracing::info!(mode = ?mode, "starting grimoire");

    let resolver = MetadataResolver::new()?;
    let init_ns = resolver.init_pid_ns_inum();

    let mut engine = PatternEngine::new(&PATTERNS, resolver, config.track_capacity);
    let mut alert_log = AlertLog::open(&config.log_path)?;

    let mut oracle = OracleHandle::load(&PATTERNS, init_ns)?;

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let metrics_handle = tokio::spawn(serve_metrics(metrics_addr));

    let events_processed = Arc::new(AtomicU64::new(0));
    let matches_emitted = Arc::new(AtomicU64::new(0));
    let enforcements_succeeded = Arc::new(AtomicU64::new(0));
    let enforcements_failed = Arc::new(AtomicU64::new(0));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let duration_deadline = config
        .duration_secs
        .map(|secs| tokio::time::Instant::now() + tokio::time::Duration::from_secs(secs));
    let mut interrupted = false;

    loop {
        let next_event = oracle.next_event();
        tokio::select! {
            event = next_event => {
                let Some(event) = event else {
                    tracing::warn!("event source closed unexpectedly");
                    break;
                };
                EVENTS_PROCESSED.inc();
                events_processed.fetch_add(1, Ordering::Relaxed);

                let results = engine.process_event(&event);
                TRACKS_ACTIVE.set(engine.track_count() as f64);

                for result in results {
                    MATCHES_EMITTED.with_label_values(&[result.pattern_name]).inc();
                    matches_emitted.fetch_add(1, Ordering::Relaxed);

                    let action = enforcement::enforce(mode, result.pid);
                    ENFORCEMENTS.with_label_values(&[action.as_str()]).inc();
                    match action {
                        enforcement::Action::Terminated => {
                            enforcements_succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        enforcement::Action::TerminateFailed => {
                            enforcements_failed.fetch_add(1, Ordering::Relaxed);
                        }
                        enforcement::Action::Logged => {}
                    }

                    tracing::warn!(
                        pattern = result.pattern_name,
                        pid = result.pid,
                        action = action.as_str(),
                        "pattern match"
                    );

                    let record = AlertRecord::new(&result, action);
                    if let Err(e) = alert_log.append(&record) {
                        tracing::error!(error = %e, "failed to write alert log");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                interrupted = true;
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sleep_until_deadline(duration_deadline) => {
                tracing::info!("configured duration elapsed, shutting down");
                break;
            }
        }
    }

    let events_dropped = oracle.dropped_events();
    EVENTS_DROPPED.inc_by(events_dropped.saturating_sub(EVENTS_DROPPED.get() as u64) as f64);
    let tracks_evicted = engine.tracks_evicted();
    TRACKS_EVICTED.inc_by(tracks_evicted.saturating_sub(TRACKS_EVICTED.get() as u64) as f64);

    oracle.shutdown().await;
    metrics_handle.abort();

    Ok(ShutdownSummary {
        events_processed: events_processed.load(Ordering::Relaxed),
        events_dropped,
        tracks_evicted,
        matches_emitted: matches_emitted.load(Ordering::Relaxed),
        enforcements_succeeded: enforcements_succeeded.load(Ordering::Relaxed),
        enforcements_failed: enforcements_failed.load(Ordering::Relaxed),
        interrupted,
    })
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

async fn handle_metrics_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from(encode_metrics())))
            .unwrap()),
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK")))
            .unwrap()),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .unwrap()),
    }
}

async fn serve_metrics(addr: SocketAddr) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(error = %e, %addr, "failed to bind metrics server");
            return;
        }
    };

    tracing::info!(%addr, "metrics server listening");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept metrics connection");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics_request))
                .await
            {
                tracing::warn!(error = %e, "metrics connection error");
            }
        });
    }
}
