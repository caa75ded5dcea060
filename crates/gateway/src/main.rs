use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use cb_domain::config::{Config, LogFormat, ObservabilityConfig};
use cb_gateway::bootstrap;
use cb_gateway::cli::{pid, Cli, Command, ConfigCommand};
use cb_gateway::router::Router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, _config_path) = cb_gateway::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            let config = bootstrap::prepare_config(config);
            run_server(Arc::new(config), tracer_provider).await
        }
        Some(Command::Run {
            message,
            conversation,
        }) => {
            init_cli_tracing();
            let (config, _) = cb_gateway::cli::load_config()?;
            let config = bootstrap::prepare_config(config);
            cb_gateway::cli::run::run(Arc::new(config), message, conversation).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cb_gateway::cli::load_config()?;
            if !cb_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cb_gateway::cli::load_config()?;
            cb_gateway::cli::config::show(&config)
        }
        Some(Command::Init { force }) => cb_gateway::cli::init::init(force),
        Some(Command::Version) => {
            println!("chatbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing for `serve`.
///
/// JSON or compact lines per `log_format`.  When `otlp_endpoint` is set an
/// OpenTelemetry layer also exports every span over OTLP/gRPC; the returned
/// provider must be shut down on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cb_gateway=debug"));

    let json_layer = (obs.log_format == LogFormat::Json)
        .then(|| tracing_subscriber::fmt::layer().json());
    let compact_layer = (obs.log_format == LogFormat::Compact)
        .then(|| tracing_subscriber::fmt::layer().compact());

    let tracer_provider = obs
        .otlp_endpoint
        .as_ref()
        .and_then(|endpoint| build_tracer_provider(endpoint, obs));
    let otel_layer = tracer_provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("chatbridge")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .with(otel_layer)
        .init();

    tracer_provider
}

fn build_tracer_provider(
    endpoint: &str,
    obs: &ObservabilityConfig,
) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                 starting without OpenTelemetry"
            );
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    Some(
        opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                obs.sample_rate,
            ))
            .with_resource(resource)
            .build(),
    )
}

/// Initialize compact stderr-only tracing for one-shot commands.
///
/// Defaults to `warn` so diagnostics do not mix with the reply on stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Hold the single-instance lock for the lifetime of the bridge.
async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "chatbridge starting");

    let pid_path = config.state.resolved_pid_file();
    let pid_handle = pid::write_pid_file(&pid_path).context("PID file")?;

    let result = serve(config).await;

    pid::remove_pid_file(&pid_path, pid_handle);

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }

    tracing::info!("shutdown complete");
    result
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    // ── Orchestrator + session store ─────────────────────────────────
    let state = bootstrap::build_app_state(config.clone())?;

    // ── Transport ────────────────────────────────────────────────────
    let (supervisor, events) = bootstrap::build_supervisor(&config);
    let router = Router::new(state.clone(), Arc::new(supervisor.clone()));

    let connecting = supervisor.clone();
    tokio::spawn(async move {
        if let Err(e) = connecting.connect().await {
            tracing::warn!(error = %e, "initial connection failed, reconnect scheduled");
        }
    });

    // ── Route until a shutdown signal ────────────────────────────────
    router.run(events, shutdown_signal()).await;

    // ── Shutdown ─────────────────────────────────────────────────────
    tracing::info!("stopping transport, flushing session store");
    supervisor.shutdown().await;
    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "session store flush on shutdown failed");
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
