use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dwelltrack::alert::{BackgroundSink, JsonDirSink, WebhookConfig, WebhookSink};
use dwelltrack::{AlertPipeline, AppConfig, Engine, JsonLinesSource};

/// Queued webhook deliveries before new alerts are dropped.
const WEBHOOK_QUEUE: usize = 64;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Raise an alert when a detected person stays in place too long"
)]
struct Args {
    /// TOML configuration file. Every key is optional.
    #[arg(long, env = "DWELLTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Newline-delimited JSON detections, one frame per line. `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: String,

    /// POST each alert as JSON to this URL (overrides [webhook].url).
    #[arg(long)]
    webhook_url: Option<String>,

    /// Also write each alert as a JSON file into this directory.
    #[arg(long)]
    alert_log_dir: Option<PathBuf>,

    /// Send a test payload to the webhook and exit.
    #[arg(long)]
    check_webhook: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = args.webhook_url {
        match cfg.webhook.as_mut() {
            Some(hook) => hook.url = url,
            None => cfg.webhook = Some(WebhookConfig::new(url)),
        }
    }
    if let Some(dir) = args.alert_log_dir {
        cfg.alert_log_dir = Some(dir);
    }
    cfg.validate()?;

    if args.check_webhook {
        let hook = cfg
            .webhook
            .ok_or_else(|| anyhow!("--check-webhook needs a webhook url"))?;
        let url = hook.url.clone();
        let status = WebhookSink::new(hook)
            .check_connection()
            .with_context(|| format!("webhook {} is not reachable", url))?;
        log::info!("webhook {} answered HTTP {}", url, status);
        return Ok(());
    }

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open detections {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    let mut pipeline = AlertPipeline::new(JsonLinesSource::new(reader), Engine::new(cfg.engine))
        .with_sample_interval(cfg.sample_interval_seconds);
    if let Some(dir) = &cfg.alert_log_dir {
        let sink = JsonDirSink::new(dir)
            .with_context(|| format!("failed to prepare alert directory {}", dir.display()))?;
        log::info!("writing alerts to {}", dir.display());
        pipeline = pipeline.with_sink(Box::new(sink));
    }
    if let Some(hook) = cfg.webhook {
        log::info!("posting alerts to {}", hook.url);
        let webhook = WebhookSink::new(hook);
        match webhook.check_connection() {
            Ok(status) => log::info!("webhook answered HTTP {}", status),
            Err(e) => log::warn!("webhook not reachable, alerts will still be attempted: {}", e),
        }
        let sink = BackgroundSink::spawn(webhook, WEBHOOK_QUEUE);
        pipeline = pipeline.with_sink(Box::new(sink));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::Relaxed);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("dwelltrack running. reading {}", args.input);
    let summary = pipeline.run(&stop)?;
    log::info!(
        "processed {} frames ({} skipped, {} clock regressions), {} alerts, {} delivery failures",
        summary.frames,
        summary.skipped,
        summary.clock_regressions,
        summary.alerts,
        summary.delivery_failures
    );
    Ok(())
}
