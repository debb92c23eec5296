use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use futures::future::BoxFuture;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mailblast::{
    DeliveryTransport, DispatchConfig, DispatchEngine, DispatchEvent, InMemoryRecipientStore,
    MailgunTransport, MessageTemplate, RenderedMessage, RunOutcome, TemplateRenderer,
    TransportError, TransportOptions,
};
use rand::Rng;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const DEFAULT_RECIPIENTS: usize = 500;
const DEFAULT_POOL_WIDTH: usize = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_FAILURE_PERCENT: u32 = 5;
const DEFAULT_LATENCY_MS: u64 = 40;
const DEFAULT_LOG_DIRECTIVE: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let bar = build_progress_bar(args.recipients as u64);

    let store = Arc::new(InMemoryRecipientStore::new());
    store.insert_many(demo_rows(args.recipients)).await;

    let transport = args.transport()?;
    let renderer = Arc::new(TemplateRenderer::new(&demo_template())?);
    let engine = DispatchEngine::new(
        args.to_dispatch_config()?,
        store.clone(),
        renderer,
        transport,
    );

    bar.println(format!(
        "Dispatching {} messages with {} workers (Ctrl-C to stop)",
        args.recipients, args.pool_width
    ));
    let watcher = spawn_progress_watcher(&engine, bar.clone());

    let run_result = engine.run_until_ctrl_c().await;
    watcher.abort();

    match run_result {
        Ok(RunOutcome::Completed(summary)) => {
            bar.finish_with_message("completed");
            bar.println(format!(
                "Delivered {} of {} ({} failed) in {:.2}s",
                summary.delivered,
                summary.total,
                summary.failed,
                summary.elapsed.as_secs_f64()
            ));
        }
        Ok(RunOutcome::Stopped(summary)) => {
            bar.abandon_with_message("stopped by Ctrl-C");
            bar.println(format!(
                "Stopped after {} of {} attempts ({} delivered)",
                summary.attempted, summary.total, summary.delivered
            ));
        }
        Err(err) => {
            bar.abandon_with_message("dispatch aborted");
            return Err(err);
        }
    }

    let failed = store
        .snapshot()
        .await
        .into_iter()
        .filter_map(|record| record.status.filter(|status| !status.is_sent()))
        .count();
    bar.println(format!("{failed} recipients carry a failed status"));
    Ok(())
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    mailblast::init_tracing();
}

fn build_progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(
        Some(len.max(1)),
        ProgressDrawTarget::stdout_with_hz(12),
    );
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spawn_progress_watcher(engine: &DispatchEngine, bar: ProgressBar) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DispatchEvent::Started { total, batch_size, .. }) => {
                    bar.set_length(total.max(1) as u64);
                    bar.set_message(format!("pages of {batch_size}"));
                }
                Ok(DispatchEvent::Progress(update)) => {
                    bar.set_position(update.sent_count as u64);
                    bar.set_message(update.status_line());
                }
                Ok(event) if event.is_terminal() => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn demo_template() -> MessageTemplate {
    MessageTemplate {
        sender_name: "Mailblast Demo".into(),
        sender_email: "demo@mailblast.test".into(),
        subject: "Your {{plan}} plan, {{name}}".into(),
        recipient_name: "{{name}}".into(),
        recipient_email: "{{email}}".into(),
        body: "<p>Hello {{name}}, thanks for staying on {{plan}}.</p>".into(),
    }
}

fn demo_rows(count: usize) -> Vec<Map<String, Value>> {
    (1..=count)
        .map(|n| {
            let mut fields = Map::new();
            fields.insert("name".into(), json!(format!("Customer {n}")));
            fields.insert("email".into(), json!(format!("customer{n}@example.com")));
            fields.insert("plan".into(), json!(if n % 3 == 0 { "team" } else { "solo" }));
            fields
        })
        .collect()
}

/// Stand-in for the HTTP API: random latency and an occasional 503.
struct SimulatedTransport {
    latency_ms: u64,
    failure_percent: u32,
}

impl DeliveryTransport for SimulatedTransport {
    fn send<'a>(
        &'a self,
        _message: &'a RenderedMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let (delay, rejected) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_range(0..=self.latency_ms.max(1)),
                    rng.gen_range(0..100) < self.failure_percent,
                )
            };
            sleep(Duration::from_millis(delay)).await;
            if rejected {
                return Err(TransportError::Http {
                    status: 503,
                    body: "simulated outage".into(),
                });
            }
            Ok(())
        })
    }
}

struct ExampleArgs {
    recipients: usize,
    pool_width: usize,
    max_attempts: usize,
    failure_percent: u32,
    latency_ms: u64,
    domain: Option<String>,
    api_key: Option<String>,
    api_base_url: Option<String>,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let recipients = parse_env_with_default("MAILBLAST_RECIPIENTS", DEFAULT_RECIPIENTS)?;
        let pool_width = parse_env_with_default("MAILBLAST_POOL_WIDTH", DEFAULT_POOL_WIDTH)?;
        let max_attempts = parse_env_with_default("MAILBLAST_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let failure_percent =
            parse_env_with_default("MAILBLAST_FAILURE_PERCENT", DEFAULT_FAILURE_PERCENT)?;
        let latency_ms = parse_env_with_default("MAILBLAST_LATENCY_MS", DEFAULT_LATENCY_MS)?;

        ensure!(
            failure_percent <= 100,
            "MAILBLAST_FAILURE_PERCENT must be between 0 and 100"
        );

        Ok(Self {
            recipients,
            pool_width,
            max_attempts,
            failure_percent,
            latency_ms,
            domain: read_optional_env("MAILBLAST_DOMAIN"),
            api_key: read_optional_env("MAILBLAST_API_KEY"),
            api_base_url: read_optional_env("MAILBLAST_API_BASE_URL"),
        })
    }

    fn to_dispatch_config(&self) -> Result<DispatchConfig> {
        DispatchConfig::builder()
            .pool_width(self.pool_width)
            .max_attempts(self.max_attempts)
            .build()
    }

    /// Real HTTP delivery when a domain and key are configured, simulated otherwise.
    fn transport(&self) -> Result<Arc<dyn DeliveryTransport>> {
        match (&self.domain, &self.api_key) {
            (Some(domain), Some(api_key)) => {
                let mut options = TransportOptions::new(domain.clone(), api_key.clone());
                if let Some(url) = &self.api_base_url {
                    options = options.with_api_base_url(url.clone());
                }
                Ok(Arc::new(MailgunTransport::new(options)?))
            }
            _ => Ok(Arc::new(SimulatedTransport {
                latency_ms: self.latency_ms,
                failure_percent: self.failure_percent,
            })),
        }
    }
}

fn read_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
