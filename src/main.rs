use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{info, warn};

use shroud::bridge::memory::InMemoryBackend;
use shroud::bridge::Messenger;
use shroud::config::Config;
use shroud::dom::{ContentSurface, Document};
use shroud::pipeline::{PageEvent, PageRuntime};
use shroud::settings::BlurStrength;
use shroud::toxicity::perspective::PerspectiveScorer;
use shroud::toxicity::traits::ToxicityScorer;

/// Shroud: client-side toxicity moderation.
///
/// Finds user-generated text on a page, classifies it, and blurs anything
/// that crosses your sensitivity threshold.
#[derive(Parser)]
#[command(name = "shroud", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Moderate a page snapshot (JSON document) and report what was hidden
    Scan {
        /// Path to the document JSON
        document: String,

        /// Sensitivity threshold between 0 and 1 (default: from settings)
        #[arg(long)]
        threshold: Option<f64>,

        /// Blur strength: light, medium or heavy
        #[arg(long)]
        blur: Option<String>,

        /// Capture evidence for every redaction
        #[arg(long)]
        evidence: bool,
    },

    /// Classify a single piece of text
    Classify {
        /// The text to classify
        text: String,
    },

    /// Print the settings a page would start with
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shroud=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            document,
            threshold,
            blur,
            evidence,
        } => {
            let config = Config::load()?;

            let mut settings = config.initial_settings.clone();
            if let Some(threshold) = threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    anyhow::bail!("--threshold must be between 0 and 1, got {threshold}");
                }
                settings.sensitivity_threshold = threshold;
            }
            if let Some(blur) = blur {
                settings.blur_strength = BlurStrength::parse(&blur).ok_or_else(|| {
                    anyhow::anyhow!("--blur must be light, medium or heavy, got {blur}")
                })?;
            }
            settings.evidence_mode |= evidence;

            let json = std::fs::read_to_string(&document)
                .with_context(|| format!("Failed to read {document}"))?;
            let page = Document::from_json(&json)
                .with_context(|| format!("Failed to parse {document}"))?;

            if config.perspective_api_key.is_empty() {
                warn!("PERSPECTIVE_API_KEY not set, nothing will be classified");
            }
            let backend = Arc::new(InMemoryBackend::new(create_scorer(&config), settings));
            if let Some(pin) = &config.parental_pin {
                backend.set_pin(pin).await?;
            }
            let messenger = Messenger::new(backend.clone());

            info!(url = page.page_url(), "Moderating page");
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner} {msg}")
                    .expect("valid template"),
            );
            spinner.set_message("Classifying page content...");
            spinner.enable_steady_tick(Duration::from_millis(100));

            let (_events, rx) = mpsc::unbounded_channel::<PageEvent<Document>>();
            let runtime =
                PageRuntime::connect(page, config.tuning.clone(), messenger.clone(), rx).await;
            let mut moderator = runtime.run_until_idle().await;
            spinner.finish_and_clear();

            if evidence {
                let nodes: Vec<_> = moderator
                    .overlays()
                    .redactions()
                    .iter()
                    .map(|r| r.node)
                    .collect();
                for node in nodes {
                    moderator.capture_evidence(node, chrono::Utc::now());
                }
                for request in moderator.drain_outbox() {
                    messenger.record(request).await?;
                }
            }

            shroud::output::terminal::display_redactions(&moderator.overlays().redactions());
            shroud::output::terminal::display_toasts(moderator.toasts());
            shroud::output::terminal::display_page_activity(
                moderator.processed_count(),
                moderator.mutation_batches(),
            );
            shroud::output::terminal::display_stats(&backend.stats().await);

            if evidence {
                let records = backend.evidence().await;
                println!("\n  Evidence captured: {}", records.len());
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
        }

        Commands::Classify { text } => {
            let config = Config::load()?;
            config.require_perspective()?;
            let scorer = create_scorer(&config);
            let classification = scorer.score_text(&text).await?;
            shroud::output::terminal::display_classification(&text, &classification);
        }

        Commands::Settings => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config.initial_settings)?);
            if config.parental_pin.is_some() {
                println!("{}", "Parental PIN configured.".dimmed());
            }
        }
    }

    Ok(())
}

/// Create the Perspective scorer from configuration.
fn create_scorer(config: &Config) -> Box<dyn ToxicityScorer> {
    info!("Using Perspective API toxicity scorer");
    Box::new(PerspectiveScorer::new(
        config.perspective_api_key.clone(),
        config.perspective_url.clone(),
        config.classifier_qps,
    ))
}
