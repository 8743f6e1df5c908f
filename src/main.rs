use anyhow::{bail, Context};
use clap::Parser;
use resilient_http::telemetry::{NoopTelemetry, PrometheusTelemetry, Telemetry};
use resilient_http::{logging, BreakerRegistry, HttpMethod, HttpRequest, ReqwestTransport, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Issue HTTP requests through a circuit breaker with bounded retries
#[derive(Parser, Debug)]
#[command(name = "resilient-http", version, about)]
struct Cli {
    /// Target URL
    url: String,

    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logical target label; selects the breaker and the [targets.<label>] table
    #[arg(short, long, default_value = "default")]
    label: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: HttpMethod,

    /// JSON body for POST, PUT and PATCH
    #[arg(short, long)]
    data: Option<String>,

    /// Extra request header as `Name: value`, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Override the total attempts per call
    #[arg(long)]
    max_retries: Option<u32>,

    /// Number of sequential calls to make through the same breaker
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Print Prometheus metrics after the calls
    #[arg(long)]
    metrics: bool,
}

fn build_request(cli: &Cli) -> anyhow::Result<HttpRequest> {
    let mut request = HttpRequest::new(cli.method, cli.url.clone());

    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header must look like `Name: value`, got `{header}`"))?;
        request = request.with_header(name.trim(), value.trim());
    }

    if let Some(data) = &cli.data {
        if !cli.method.carries_body() {
            bail!("{} requests do not carry a body", cli.method);
        }
        let value: serde_json::Value =
            serde_json::from_str(data).context("--data must be valid JSON")?;
        request = request.with_json(value);
    }

    Ok(request)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    logging::init(&settings.logging)?;

    let metrics_handle = if cli.metrics {
        Some(PrometheusTelemetry::install()?)
    } else {
        None
    };
    let telemetry: Arc<dyn Telemetry> = if metrics_handle.is_some() {
        Arc::new(PrometheusTelemetry::new().with_target(cli.label.clone()))
    } else {
        Arc::new(NoopTelemetry)
    };

    let mut target = settings.target(&cli.label).clone();
    if let Some(max_retries) = cli.max_retries {
        target.max_retries = max_retries;
    }

    let registry = BreakerRegistry::new();
    let caller = target
        .caller_builder(cli.label.clone())
        .telemetry(telemetry)
        .transport(Arc::new(ReqwestTransport::new(&settings.http)?))
        .build(&registry)
        .await?;

    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight call");
            shutdown_trigger.cancel();
        }
    });

    let request = build_request(&cli)?;
    let mut failures = 0u32;

    for _ in 0..cli.repeat {
        match caller
            .execute_with_cancellation(request.clone(), &shutdown)
            .await
        {
            Ok(response) => {
                println!("{}", response.status);
                println!("{}", response.text());
            }
            Err(err) => {
                eprintln!("error: {err}");
                failures += 1;
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
    }

    for snapshot in registry.snapshots().await {
        info!(
            label = %snapshot.label,
            state = snapshot.state.name(),
            consecutive_failures = snapshot.consecutive_failures,
            rejections = snapshot.total_rejections,
            "Circuit breaker summary"
        );
    }

    if let Some(handle) = metrics_handle {
        print!("{}", handle.render());
    }

    if failures > 0 {
        bail!("{failures} of {} call(s) failed", cli.repeat);
    }
    Ok(())
}
