use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::Parser;
use colored::*;
use futures::StreamExt;
use gemgen::logger::{self, LoggerConfig};
use gemgen::orchestrator::VariationFailure;
use gemgen::{
    codec, AggregateUsage, AppConfig, AspectRatio, CredentialStore, FileStore, GeminiClient,
    GenError, GenerationRequest, ImageClient, OutcomeKind, PreferenceStore, PricingTable,
    ProgressEvent,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "gemgen",
    version,
    about = "Generate images with Gemini, several variations at once"
)]
struct Cli {
    /// Prompt text. Defaults to the last prompt used.
    prompt: Option<String>,

    /// Gemini API key. Remembered for later runs.
    #[arg(long)]
    api_key: Option<String>,

    /// Model identifier. Defaults to the last model used.
    #[arg(long)]
    model: Option<String>,

    /// Number of variations to request (1-4).
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    count: u8,

    /// Aspect ratio: 1:1, 16:9, 9:16, 4:3 or 3:4.
    #[arg(long, default_value = "1:1")]
    aspect: AspectRatio,

    /// Reference image to send ahead of the prompt. Repeatable.
    #[arg(short = 'r', long = "reference")]
    references: Vec<PathBuf>,

    /// Directory the generated images are written to.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON pricing table replacing the built-in one.
    #[arg(long)]
    pricing: Option<PathBuf>,

    /// Preference file holding the stored key, prompt and model.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Remove the stored API key.
    #[arg(long)]
    forget_key: bool,

    /// List known image models and exit.
    #[arg(long)]
    list_models: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary<'a> {
    run_id: &'a str,
    model: &'a str,
    requested: usize,
    completed: usize,
    empty_variations: usize,
    saved: &'a [PathBuf],
    failures: &'a [VariationFailure],
    error: Option<&'a str>,
    usage: Option<&'a AggregateUsage>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

/// Key, prompt and model a run will use.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    api_key: String,
    prompt: String,
    model: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();
    logger::init_with_config(LoggerConfig::from_env())?;
    if dotenv_loaded {
        log::debug!("✅ .env file loaded");
    }

    let cli = Cli::parse();
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    if cli.list_models {
        let pricing = load_pricing(cli.pricing.as_ref())?;
        for model in ImageClient::supported_models() {
            let rates = pricing
                .get(&model.id)
                .map(|p| {
                    format!(
                        "in ${:.2}/M, image out ${:.2}/M",
                        p.input_per_million, p.output_image_per_million
                    )
                })
                .unwrap_or_else(|| "unpriced".to_string());
            println!(
                "{} {:<13} {}  ({})",
                format!("{:<44}", model.id).bold(),
                model.stage.as_str(),
                model.name,
                rates
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = AppConfig::from_env();
    if let Some(store) = &cli.store {
        config = config.with_store_path(store);
    }
    if let Some(output) = &cli.output {
        config = config.with_output_dir(output);
    }
    if let Some(pricing) = &cli.pricing {
        config = config.with_pricing_file(pricing);
    }

    let store = FileStore::new(&config.store_path);
    let credentials = CredentialStore::new(&store);
    let preferences = PreferenceStore::new(&store);

    if cli.forget_key {
        credentials.clear()?;
        println!("Stored API key removed from {}", store.path().display());
        if cli.prompt.is_none() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let settings = match resolve_settings(&cli, &config, &credentials, &preferences) {
        Ok(settings) => settings,
        Err(e) if e.is_validation() => {
            log::error!("❌ {}", e);
            flush_logs();
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };
    remember(&credentials, &preferences, &settings);
    let Settings {
        api_key,
        prompt,
        model,
    } = settings;

    let pricing = load_pricing(config.pricing_file.as_ref())?;

    let mut request = GenerationRequest::new(prompt)
        .with_model(model.clone())
        .with_count(usize::from(cli.count))
        .with_aspect_ratio(cli.aspect);
    for path in &cli.references {
        request = request.with_reference_image(codec::encode_file(path).await?);
    }

    config.gemini = config.gemini.with_api_key(api_key).with_model(model);
    logger::log_config_info(&config);

    let client = GeminiClient::new(config.gemini.clone())?;
    let orchestrator = client.orchestrator(pricing);
    let (mut events, handle) = orchestrator.run_stream(request)?;

    let mut saved: Vec<PathBuf> = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::Started { total, .. } => {
                if !cli.json {
                    println!("🎨 Generating {} image(s)...", total);
                }
            }
            ProgressEvent::ImageReady { image, .. } => {
                match codec::save_image(&image, saved.len(), &config.output_dir).await {
                    Ok(path) => saved.push(path),
                    Err(e) => log::error!("❌ Failed to save image: {}", e),
                }
            }
            ProgressEvent::Settled {
                variation,
                completed,
                total,
                outcome,
            } => {
                if !cli.json {
                    let label = match outcome {
                        OutcomeKind::Image => "image".green(),
                        OutcomeKind::Empty => "no image".yellow(),
                        OutcomeKind::Failed => "failed".red(),
                    };
                    println!("[{}/{}] variation {}: {}", completed, total, variation + 1, label);
                }
            }
        }
    }

    let report = handle.await??;

    if cli.json {
        let summary = RunSummary {
            run_id: &report.run_id,
            model: &report.model,
            requested: report.requested,
            completed: report.completed,
            empty_variations: report.empty_variations,
            saved: &saved,
            failures: &report.failures,
            error: report.error.as_deref(),
            usage: report.usage.as_ref(),
            started_at: report.started_at,
            finished_at: report.finished_at,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for path in &saved {
            println!("💾 {}", path.display());
        }
        if let Some(error) = &report.error {
            println!("\n{}", "❌ Errors:".red().bold());
            println!("{}", error);
        }
        if let Some(usage) = &report.usage {
            println!(
                "\n📊 Tokens: {} prompt + {} output = {} total, {} image(s)",
                usage.prompt_tokens, usage.candidate_tokens, usage.total_tokens, usage.image_count
            );
            println!("💰 Estimated cost: ${:.4}", usage.estimated_cost_usd);
        }
    }

    flush_logs();
    if report.has_images() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Flags win, then the environment, then what the store remembers.
fn resolve_settings(
    cli: &Cli,
    config: &AppConfig,
    credentials: &CredentialStore<'_>,
    preferences: &PreferenceStore<'_>,
) -> gemgen::Result<Settings> {
    let api_key = match non_blank(cli.api_key.clone())
        .or_else(|| config.gemini.api_key().map(str::to_string))
    {
        Some(key) => Some(key),
        None => credentials.api_key()?,
    }
    .map(|key| key.trim().to_string())
    .ok_or_else(|| {
        GenError::ValidationError(
            "API key is required: pass --api-key or set GEMINI_API_KEY".into(),
        )
    })?;

    let prompt = match non_blank(cli.prompt.clone()) {
        Some(prompt) => Some(prompt),
        None => non_blank(preferences.last_prompt()?),
    }
    .ok_or_else(|| GenError::ValidationError("A prompt is required".into()))?;

    let model = match non_blank(cli.model.clone()) {
        Some(model) => model,
        None => non_blank(preferences.last_model()?)
            .unwrap_or_else(|| config.gemini.model.clone()),
    };

    Ok(Settings {
        api_key,
        prompt,
        model,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn flush_logs() {
    log::Log::flush(log::logger());
}

fn load_pricing(path: Option<&PathBuf>) -> gemgen::Result<PricingTable> {
    match path {
        Some(path) => PricingTable::from_json_file(path),
        None => Ok(PricingTable::default()),
    }
}

fn remember(credentials: &CredentialStore<'_>, preferences: &PreferenceStore<'_>, settings: &Settings) {
    let results = [
        credentials.set_api_key(&settings.api_key),
        preferences.set_last_prompt(&settings.prompt),
        preferences.set_last_model(&settings.model),
    ];
    for result in results {
        if let Err(e) = result {
            log::warn!("⚠️  Could not save preferences: {}", e);
        }
    }
}
