mod bus;
mod collectors;
mod config;
mod detector;
mod http;
mod log_store;
mod metrics;
mod model;
mod notifier;
mod poller;
mod probe;
mod sampler;
mod shutdown;

use axum::serve;
use bus::Bus;
use chrono::Local;
use clap::Parser;
use config::Config;
use http::{HttpAppState, SharedView, ViewFeed};
use log_store::LogStore;
use metrics::Metrics;
use notifier::{DesktopNotifier, NoopNotifier, NotificationDispatcher, Notifier};
use poller::{Poller, PollerSettings};
use probe::SystemProbe;
use sampler::SystemSampler;
use shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hdmiwatch")]
#[command(version)]
#[command(about = "Watches HDMI connection state and graphics driver health")]
struct Cli {
    #[arg(long, default_value = "./hdmiwatch.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `log_file` from the config.
    #[arg(long)]
    log_file: Option<String>,
    #[arg(long, conflicts_with = "notifications_off")]
    notifications_on: bool,
    #[arg(long, conflicts_with = "notifications_on")]
    notifications_off: bool,
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    if !std::path::Path::new(&cli.config).exists() {
        info!(path = %cli.config, "config file not found, using built-in defaults");
    }
    let mut cfg = match Config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(log_file) = cli.log_file {
        cfg.log_file = log_file;
    }
    if cli.notifications_on {
        cfg.notifications.enabled = true;
    } else if cli.notifications_off {
        cfg.notifications.enabled = false;
    }
    if cli.no_http {
        cfg.http.enabled = false;
    }

    info!(
        probe_interval = %humantime::format_duration(cfg.probe_interval()),
        metrics_interval = %humantime::format_duration(cfg.metrics_interval()),
        log_file = %cfg.log_file,
        notifications = cfg.notifications.enabled,
        "starting hdmiwatch"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let store = LogStore::new(&cfg.log_file);
    if let Err(err) = store.ensure_initialized() {
        warn!(
            error = %err,
            path = %store.path().display(),
            "event log could not be initialized, appends will retry"
        );
    }

    let notifier: Arc<dyn Notifier> = if cfg.notifications.enabled {
        Arc::new(DesktopNotifier::new("hdmiwatch"))
    } else {
        Arc::new(NoopNotifier)
    };
    let (dispatcher, notification_worker) = NotificationDispatcher::spawn(
        notifier,
        cfg.notifications.queue_capacity,
        Duration::from_secs(cfg.notifications.duration_secs),
        metrics.clone(),
    );

    let shutdown = Shutdown::new();
    let bus = Bus::new(cfg.channel_capacity);
    let view = SharedView::default();
    let view_feed = ViewFeed::subscribe(&bus);

    let (poller, poller_handle) = Poller::new(
        Arc::new(SystemProbe::host()),
        store.clone(),
        dispatcher,
        bus.clone(),
        metrics.clone(),
        PollerSettings {
            interval: cfg.probe_interval(),
            notification_title: cfg.notifications.title.clone(),
            notify_on_cycle_error: cfg.notifications.notify_on_cycle_error,
        },
    );
    let sampler = SystemSampler::new(cfg.metrics_interval(), bus.clone(), metrics.clone());

    let view_task = tokio::spawn(view_feed.run(view.clone(), shutdown.clone()));
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));
    let sampler_task = tokio::spawn(sampler.run(shutdown.clone()));

    let http_task = if cfg.http.enabled {
        let app_state = HttpAppState {
            metrics: metrics.clone(),
            view,
            store,
            poller: poller_handle,
            shutdown: shutdown.clone(),
            started_at: Local::now(),
        };
        let listen = cfg.http.listen.clone();
        let addr = cfg.http.listen_addr();
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let addr = match addr {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };
            info!(listen = %addr, "HTTP server listening");

            let app = http::build_router(app_state);
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        }))
    } else {
        drop(poller_handle);
        None
    };

    let mut stop = shutdown.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for Ctrl+C");
            }
            info!("received Ctrl+C, shutting down");
        }
        _ = stop.wait_for(|stopped| *stopped) => {}
    }
    shutdown.trigger();

    if let Err(err) = poller_task.await {
        error!(error = %err, "display poller task failed");
    }
    if let Err(err) = sampler_task.await {
        error!(error = %err, "system sampler task failed");
    }
    let _ = view_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
    // The poller held the last dispatcher; the worker drains what is queued and exits.
    let _ = notification_worker.await;
    info!("hdmiwatch stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
