//! lmx-server — entry point.
//!
//! Startup order:
//! 1. Parse CLI overrides, then configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Build the shared application state (wires every orchestration
//!    component together).
//! 4. Restore any models resident at last observation if the prior
//!    shutdown was not clean.
//! 5. Start the agent-run scheduler's background workers and the helper
//!    fabric's health probes.
//! 6. Spawn the periodic expired-download reaper.
//! 7. Build the Axum router and start the HTTP server with graceful
//!    shutdown.

mod backends;
mod config;
mod downloads;
mod error;
mod middleware;
mod routes;
mod sessions;
mod skills;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lmx_types::{ChatMessage, ChatRole, GenerationParams, GenerationRequest};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

/// CLI overrides layered on top of environment-variable configuration.
#[derive(Debug, Parser)]
#[command(name = "lmx-server", version, about = "Local multi-model inference orchestration server")]
struct Cli {
    /// Override the TCP bind address (`LMX_BIND`).
    #[arg(long)]
    bind: Option<String>,

    /// Path to a config file. Currently informational only; all
    /// configuration is read from the environment, matching the teacher's
    /// env-only `Config::from_env` convention.
    #[arg(long)]
    config_file: Option<String>,

    /// Override the tracing filter string (`LMX_LOG`).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env();
    if let Some(bind) = cli.bind {
        cfg.bind_address = bind;
    }
    if let Some(log_level) = cli.log_level {
        cfg.log_level = log_level;
    }
    if let Some(config_file) = &cli.config_file {
        eprintln!("note: --config-file={config_file} is accepted but not yet read; all configuration comes from LMX_* environment variables");
    }

    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: LMX_LOG='{}' is not a valid tracing filter ({}); falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "lmx-server starting");

    let state = AppState::build(cfg).await?;
    info!("application state ready");

    state.lifecycle.restore().await;

    state.run_scheduler.start(build_run_handler(Arc::clone(&state)));
    state
        .helper_fabric
        .spawn_health_probes(Duration::from_secs(state.config.helper_health_probe_interval_secs));

    spawn_download_reaper(Arc::clone(&state));

    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = state.config.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.lifecycle.mark_clean_shutdown().await;
    info!("lmx-server stopped");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RunWireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RunRequestBody {
    model: String,
    messages: Vec<RunWireMessage>,
    #[serde(default)]
    client_id: Option<String>,
}

fn run_wire_role(role: &str) -> ChatRole {
    match role {
        "system" => ChatRole::System,
        "assistant" => ChatRole::Assistant,
        "tool" => ChatRole::Tool,
        _ => ChatRole::User,
    }
}

/// Builds the closure `RunScheduler::start` drives: parse the run's request
/// JSON as a chat-completion body, dispatch it through the same generator
/// every synchronous request uses, and report back the generated content.
fn build_run_handler(state: Arc<AppState>) -> lmx_core::run_scheduler::RunHandler {
    Arc::new(move |run: lmx_types::AgentRun| {
        let state = Arc::clone(&state);
        Box::pin(async move {
            let body: RunRequestBody = serde_json::from_value(run.request)
                .map_err(|e| format!("invalid agent run request: {e}"))?;

            let messages: Vec<ChatMessage> = body
                .messages
                .into_iter()
                .map(|m| ChatMessage {
                    role: run_wire_role(&m.role),
                    content: m.content,
                })
                .collect();

            let request = GenerationRequest {
                model_id: body.model,
                messages,
                params: GenerationParams::default(),
                client_id: body.client_id.unwrap_or_else(|| "agent-run".to_string()),
            };

            let response = state
                .generator
                .generate(request)
                .await
                .map_err(|e| e.to_string())?;

            Ok(serde_json::json!({
                "content": response.content,
                "finish_reason": response.finish_reason,
                "usage": {
                    "prompt_tokens": response.usage.prompt_tokens,
                    "completion_tokens": response.usage.completion_tokens,
                    "total_tokens": response.usage.total_tokens,
                },
            }))
        })
    })
}

fn spawn_download_reaper(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.download_reap_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            state.downloads.reap_expired().await;
        }
    });
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
