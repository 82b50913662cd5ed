mod api;
mod config;
mod runs;
mod scenarios;
mod viewer;
mod watcher;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::runs::RunStatus;
use crate::runs::file_repository::FileRunRepository;
use crate::runs::hub::BroadcastHub;
use crate::runs::repository::RunRepository;
use crate::runs::supervisor::RunSupervisor;
use crate::scenarios::file_repository::FileScenarioRepository;
use crate::scenarios::repository::ScenarioRepository;
use crate::viewer::watch::{WatchOptions, watch};

#[derive(Parser)]
#[command(name = "cybersim", about = "Scenario runner with live output streaming")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Follow a run's output live until it finishes
    Watch {
        /// Id of the run to follow
        #[arg(long)]
        run: String,
        /// Server URL to connect to
        #[arg(long, default_value = "http://localhost:5000")]
        server: String,
        /// Consecutive reconnect attempts before giving up
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // No subcommand means serve; --help and --version still go through clap.
    let cli = if std::env::args().len() <= 1 {
        Cli::Serve
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve => run_server().await,
        Cli::Watch {
            run,
            server,
            max_attempts,
        } => {
            init_tracing("cybersim=warn");
            let mut opts = WatchOptions::new(server, run);
            opts.policy.max_attempts = max_attempts;

            let status = watch(&opts, &mut std::io::stdout()).await?;
            eprintln!("run finished: {status}");
            if status != RunStatus::Success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();
}

async fn run_server() -> Result<(), Box<dyn Error>> {
    let config = config::Config::from_env();

    init_tracing("cybersim=info,tower_http=warn,hyper=warn");

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let run_repo: Arc<dyn RunRepository> = Arc::new(FileRunRepository::new(config.data_dir.clone()));
    run_repo
        .load_all()
        .await
        .context("failed to load run store")?;

    let scenario_repo = Arc::new(FileScenarioRepository::new(&config.scenarios_dir));
    scenario_repo
        .load_all()
        .await
        .context("failed to load scenarios")?;

    // Keep the watcher alive for the lifetime of the server
    let _scenario_watcher = match watcher::ScenarioWatcher::start(scenario_repo.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "failed to start scenario watcher, edits need a restart");
            None
        }
    };

    let hub = Arc::new(BroadcastHub::new(config.viewer_buffer));
    let supervisor = Arc::new(RunSupervisor::new(
        run_repo.clone(),
        hub.clone(),
        config.shell.clone(),
        config.finalize_retries,
    ));

    let app_state = api::AppState {
        run_repo,
        scenario_repo: scenario_repo as Arc<dyn ScenarioRepository>,
        hub,
        supervisor,
    };

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = config.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        scenarios_dir = %config.scenarios_dir.display(),
        "Listening on http://{addr}"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
