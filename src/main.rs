use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use outreach_gate::channels::{DeliveryChannel, LoggingChannel, WebhookChannel};
use outreach_gate::config::PipelineConfig;
use outreach_gate::contacts::model::ChannelKind;
use outreach_gate::pipeline::persona::PersonaValidator;
use outreach_gate::pipeline::processor::load_raw_contacts;
use outreach_gate::pipeline::routing::RoutingEngine;
use outreach_gate::pipeline::scoring::ScoringEngine;
use outreach_gate::pipeline::{ContactSignal, OutreachGate, PipelineRunner};
use outreach_gate::providers::{ApolloProvider, OpenRouterGenerator};
use outreach_gate::store::{Database, LibSqlBackend};

const USAGE: &str = "usage: outreach-gate [--import <file.json>] [--summary] [--reset-round-robin]
                     [--reply|--opt-out|--bounce|--delivered <contact-id>]
                     [--resolve-conflict <company>] [--no-run]";

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    import: Option<PathBuf>,
    summary: bool,
    reset_round_robin: bool,
    signal: Option<(ContactSignal, Uuid)>,
    resolve_conflict: Option<String>,
    no_run: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().with_context(|| format!("{flag} needs a value"));
        match arg.as_str() {
            "--import" => args.import = Some(PathBuf::from(value("--import")?)),
            "--summary" => args.summary = true,
            "--reset-round-robin" => args.reset_round_robin = true,
            "--no-run" => args.no_run = true,
            "--resolve-conflict" => args.resolve_conflict = Some(value("--resolve-conflict")?),
            "--reply" | "--opt-out" | "--bounce" | "--delivered" => {
                let signal = match arg.as_str() {
                    "--reply" => ContactSignal::Reply,
                    "--opt-out" => ContactSignal::OptOut,
                    "--bounce" => ContactSignal::Bounce,
                    _ => ContactSignal::Delivered,
                };
                let id = Uuid::parse_str(&value(arg.as_str())?).context("contact id must be a UUID")?;
                args.signal = Some((signal, id));
            }
            "-h" | "--help" => {
                eprintln!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument {other}\n{USAGE}"),
        }
    }
    Ok(args)
}

fn channel(kind: ChannelKind, webhook: Option<&str>, dry_run: bool) -> Arc<dyn DeliveryChannel> {
    match webhook {
        Some(url) if !dry_run => Arc::new(WebhookChannel::new(kind, url)),
        _ => Arc::new(LoggingChannel::new(kind)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log to stderr, plus a daily file when OUTREACH_LOG_DIR is set.
    let (file_writer, _log_guard) = match std::env::var("OUTREACH_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "outreach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        _ => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
        .init();

    let args = parse_args()?;
    let config = PipelineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export OUTREACH_EVENT_DATE=2026-03-10");
        std::process::exit(1);
    });

    eprintln!("Outreach Gate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Event: {}", config.event_date.to_rfc3339());
    eprintln!("   Database: {}", config.db_path.display());
    if config.dry_run {
        eprintln!("   Dry run: messages are logged, not sent");
    }

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    let scoring = ScoringEngine::new(config.scoring_policy()?)?;
    let validator = PersonaValidator::new(config.persona.clone())?;
    let routing = RoutingEngine::new(config.routing_policy()?);
    let gate = OutreachGate::new(config.schedule()?);

    let mut runner = PipelineRunner::new(db, scoring, validator, routing, gate, config.limits)
        .with_channel(channel(
            ChannelKind::LinkedIn,
            config.linkedin_webhook.as_deref(),
            config.dry_run,
        ))
        .with_channel(channel(
            ChannelKind::Email,
            config.email_webhook.as_deref(),
            config.dry_run,
        ));

    match config.apollo_api_key.clone() {
        Some(key) => {
            runner = runner.with_enrichment(Arc::new(ApolloProvider::new(
                key,
                config.limits.provider_timeout,
            )?));
        }
        None => tracing::warn!("APOLLO_API_KEY not set; enrichment is skipped"),
    }
    match config.openrouter_api_key.clone() {
        Some(key) => {
            runner = runner.with_persona_generator(Arc::new(OpenRouterGenerator::new(
                key,
                config.persona_model.clone(),
                config.limits.provider_timeout,
            )?));
        }
        None => tracing::warn!("OPENROUTER_API_KEY not set; persona generation is skipped"),
    }

    if args.reset_round_robin {
        runner.reset_routing_cursors().await?;
        eprintln!("   Round-robin cursors reset");
    }

    if let Some(company) = &args.resolve_conflict {
        let resolved = runner.db().resolve_conflict(company).await?;
        eprintln!("   Conflict for {company}: {}", if resolved { "resolved" } else { "not found" });
    }

    if let Some((signal, id)) = args.signal {
        let changed = runner.record_signal(id, signal, Utc::now()).await?;
        eprintln!("   {signal:?} for {id}: {}", if changed { "recorded" } else { "no change" });
    }

    if let Some(path) = args.import.as_ref().or(config.import_path.as_ref()) {
        let rows = load_raw_contacts(path).await?;
        let source = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "import".into());
        let report = runner.ingest(rows, &source).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if !args.no_run && !args.summary {
        let report = runner.run_batch(Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if args.summary {
        let summary = runner.summarize().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
