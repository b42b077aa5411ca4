//! CLI binary for slidecite.
//!
//! A thin shim over the library crate that maps subcommands and flags to
//! `CheckConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use slidecite::server::{self, AppState, ServerConfig};
use slidecite::{
    check_deck, check_deck_to_file, extract_deck, render_deck, suggest, CheckConfig,
    CheckProgressCallback, DeckReport, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per analysed slide. Slides complete
/// out of order, so start times are tracked per slide number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_check_start` reports how many slides will be analysed.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Decoding and rendering deck…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Checking");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, slide: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&slide))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl CheckProgressCallback for CliProgressCallback {
    fn on_check_start(&self, total_slides: usize) {
        self.activate_bar(total_slides);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Checking {total_slides} slides…"))
        ));
    }

    fn on_slide_start(&self, slide_number: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(slide_number, Instant::now());
        }
        self.bar.set_message(format!("slide {slide_number}"));
    }

    fn on_slide_complete(&self, slide_number: usize, total: usize, has_citations: bool) {
        let secs = self.elapsed_secs(slide_number);
        let outcome = if has_citations {
            cyan("uncited sources found")
        } else {
            dim("no new sources")
        };
        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {}  {}",
            green("✓"),
            slide_number,
            total,
            outcome,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_slide_error(&self, slide_number: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(slide_number);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {}  {}",
            red("✗"),
            slide_number,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_check_complete(&self, total_slides: usize, success_count: usize) {
        let failed = total_slides.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} slides checked",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} slides checked  ({} failed)",
                cyan("⚠"),
                bold(&success_count.to_string()),
                total_slides,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Check a whole deck, print the reference lists
  slidecite check lecture.pptx

  # Write the full JSON report
  slidecite check lecture.pptx -o report.json

  # Only extract texts and embedded images
  slidecite extract lecture.pptx --output-dir pptx_output

  # Only render thumbnails through Google Slides
  slidecite render lecture.pptx --credentials token.json

  # One slide
  slidecite suggest --image gs_slides_images/slide_3.png --text "Figure 1 (Smith, 2020)"

  # HTTP service for the add-in
  slidecite serve --bind 0.0.0.0:8000 --allowed-origins https://localhost:3000

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY                  OpenAI API key
  ANTHROPIC_API_KEY               Anthropic API key
  GEMINI_API_KEY                  Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER          Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL                 Override model ID
  GOOGLE_APPLICATION_CREDENTIALS  Google authorized_user credential file
  SLIDECITE_GOOGLE_ACCESS_TOKEN   Google OAuth bearer token

  A `.env` file in the working directory is loaded first.
"#;

/// Detect uncited figures and tables in slide decks.
#[derive(Parser, Debug)]
#[command(
    name = "slidecite",
    version,
    about = "Detect uncited figures and tables in slide decks and draft APA references",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SLIDECITE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SLIDECITE_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract per-slide texts and embedded images into the content store.
    Extract {
        /// Local PPTX path or HTTP/HTTPS URL.
        input: String,
        #[command(flatten)]
        dirs: DirArgs,
        /// Print slide_texts.json content to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Render whole-slide PNG thumbnails through Google Slides.
    Render {
        /// Local PPTX path or HTTP/HTTPS URL.
        input: String,
        #[command(flatten)]
        dirs: DirArgs,
        #[command(flatten)]
        google: GoogleArgs,
    },

    /// Analyse one slide image with its text.
    Suggest {
        /// Slide image (PNG or JPEG).
        #[arg(long)]
        image: PathBuf,
        /// Slide text.
        #[arg(long, conflicts_with = "text_file", default_value = "")]
        text: String,
        /// Read the slide text from a file.
        #[arg(long)]
        text_file: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Decode, render and analyse every slide of a deck.
    Check {
        /// Local PPTX path or HTTP/HTTPS URL.
        input: String,
        /// Write the JSON report to this file.
        #[arg(short, long, env = "SLIDECITE_OUTPUT")]
        output: Option<PathBuf>,
        /// Print the JSON report to stdout instead of reference lists.
        #[arg(long)]
        json: bool,
        /// Disable progress bar.
        #[arg(long, env = "SLIDECITE_NO_PROGRESS")]
        no_progress: bool,
        /// Continue when the rendered slide count differs from the deck.
        #[arg(long)]
        skip_slide_count_check: bool,
        #[command(flatten)]
        dirs: DirArgs,
        #[command(flatten)]
        google: GoogleArgs,
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Serve POST /api/suggest.
    Serve {
        /// Listen address.
        #[arg(long, env = "SLIDECITE_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
        /// Comma-separated allowed CORS origins, or `*`.
        #[arg(long, env = "SLIDECITE_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
        allowed_origins: Vec<String>,
        /// Directory served at `/` (the add-in's web assets).
        #[arg(long, env = "SLIDECITE_STATIC_DIR")]
        static_dir: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Debug)]
struct DirArgs {
    /// Content store for embedded images and slide_texts.json.
    #[arg(long, env = "SLIDECITE_OUTPUT_DIR", default_value = "pptx_output")]
    output_dir: PathBuf,

    /// Directory for slide_{N}.png thumbnails and slide_images.json.
    #[arg(long, env = "SLIDECITE_THUMBNAIL_DIR", default_value = "gs_slides_images")]
    thumbnail_dir: PathBuf,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "SLIDECITE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Slides exported or analysed at once.
    #[arg(short, long, env = "SLIDECITE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,
}

#[derive(Args, Debug)]
struct GoogleArgs {
    /// Google credential file (authorized_user JSON or a JSON holding an access token).
    #[arg(long, env = "SLIDECITE_GOOGLE_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Per-request timeout against Google APIs in seconds.
    #[arg(long, env = "SLIDECITE_RENDER_TIMEOUT", default_value_t = 60)]
    render_timeout: u64,

    /// Retries for upload and presentation lookup.
    #[arg(long, env = "SLIDECITE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Model ID (default: gpt-4.1).
    #[arg(long, env = "SLIDECITE_MODEL")]
    model: Option<String>,

    /// Provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "SLIDECITE_PROVIDER")]
    provider: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "SLIDECITE_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max output tokens per slide.
    #[arg(long, env = "SLIDECITE_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Per-slide engine timeout in seconds.
    #[arg(long, env = "SLIDECITE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

impl DirArgs {
    fn apply(&self, b: slidecite::CheckConfigBuilder) -> slidecite::CheckConfigBuilder {
        b.output_dir(&self.output_dir)
            .thumbnail_dir(&self.thumbnail_dir)
            .download_timeout_secs(self.download_timeout)
            .concurrency(self.concurrency)
    }
}

impl GoogleArgs {
    fn apply(&self, b: slidecite::CheckConfigBuilder) -> slidecite::CheckConfigBuilder {
        let b = b
            .render_timeout_secs(self.render_timeout)
            .max_retries(self.max_retries);
        match self.credentials {
            Some(ref path) => b.credentials_path(path),
            None => b,
        }
    }
}

impl EngineArgs {
    fn apply(&self, b: slidecite::CheckConfigBuilder) -> slidecite::CheckConfigBuilder {
        let mut b = b
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .api_timeout_secs(self.api_timeout);
        if let Some(ref model) = self.model {
            b = b.model(model);
        }
        if let Some(ref provider) = self.provider {
            b = b.provider_name(provider);
        }
        b
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs during `check`.
    let bar_active = matches!(
        cli.command,
        Command::Check { json: false, no_progress: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || bar_active {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ctrl-C → cooperative cancellation ────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let quiet = cli.quiet;
    match cli.command {
        Command::Extract { input, dirs, json } => {
            let config = dirs
                .apply(CheckConfig::builder())
                .cancellation(cancel)
                .build()
                .context("Invalid configuration")?;
            let slides = extract_deck(&input, &config)
                .await
                .context("Extraction failed")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&slides).context("Failed to serialise slides")?
                );
            } else if !quiet {
                let images: usize = slides.iter().map(|s| s.images.len()).sum();
                eprintln!(
                    "{}  {} slides, {} embedded images  →  {}",
                    green("✔"),
                    slides.len(),
                    images,
                    bold(&config.output_dir.join("slide_texts.json").display().to_string()),
                );
            }
        }

        Command::Render { input, dirs, google } => {
            let config = google
                .apply(dirs.apply(CheckConfig::builder()))
                .cancellation(cancel)
                .build()
                .context("Invalid configuration")?;
            let out = render_deck(&input, &config)
                .await
                .context("Rendering failed")?;
            if !quiet {
                for failure in &out.failures {
                    eprintln!("  {} {}", red("✗"), failure);
                }
                eprintln!(
                    "{}  {}/{} thumbnails  →  {}",
                    if out.failures.is_empty() {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    out.thumbnails.len(),
                    out.remote_slide_count,
                    bold(&out.manifest_path.display().to_string()),
                );
            }
        }

        Command::Suggest {
            image,
            text,
            text_file,
            engine,
        } => {
            let text = match text_file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read slide text from {:?}", path))?,
                None => text,
            };
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read image {:?}", image))?;
            let config = engine
                .apply(CheckConfig::builder())
                .build()
                .context("Invalid configuration")?;
            let result = suggest(&text, &bytes, &config)
                .await
                .context("Analysis failed")?;
            println!("{result}");
        }

        Command::Check {
            input,
            output,
            json,
            no_progress,
            skip_slide_count_check,
            dirs,
            google,
            engine,
        } => {
            let progress_cb: Option<ProgressCallback> = if bar_active && !no_progress {
                let cb = CliProgressCallback::new_dynamic();
                Some(cb as Arc<dyn CheckProgressCallback>)
            } else {
                None
            };

            let mut builder = engine
                .apply(google.apply(dirs.apply(CheckConfig::builder())))
                .verify_slide_count(!skip_slide_count_check)
                .cancellation(cancel);
            if let Some(cb) = progress_cb {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            if let Some(ref output_path) = output {
                let stats = check_deck_to_file(&input, output_path, &config)
                    .await
                    .context("Check failed")?;
                if !quiet {
                    eprintln!(
                        "{}  {}/{} slides  {} with uncited sources  {}ms  →  {}",
                        if stats.failed_slides + stats.skipped_slides == 0 {
                            green("✔")
                        } else {
                            cyan("⚠")
                        },
                        stats.analyzed_slides,
                        stats.total_slides,
                        stats.slides_with_citations,
                        stats.total_duration_ms,
                        bold(&output_path.display().to_string()),
                    );
                }
            } else {
                let report = check_deck(&input, &config).await.context("Check failed")?;
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&report)
                            .context("Failed to serialise report")?
                    );
                } else {
                    print_report(&report);
                    if !quiet {
                        eprintln!(
                            "   {} tokens in  /  {} tokens out  —  {}ms total",
                            dim(&report.stats.total_input_tokens.to_string()),
                            dim(&report.stats.total_output_tokens.to_string()),
                            report.stats.total_duration_ms,
                        );
                    }
                }
            }
        }

        Command::Serve {
            bind,
            allowed_origins,
            static_dir,
            engine,
        } => {
            let config = engine
                .apply(CheckConfig::builder())
                .build()
                .context("Invalid configuration")?;
            let state = AppState::from_config(&config).context("Reasoning engine unavailable")?;
            let server_config = ServerConfig {
                bind,
                allowed_origins,
                static_dir,
            };
            server::serve(state, &server_config, cancel)
                .await
                .context("Server failed")?;
        }
    }

    Ok(())
}

/// One block per slide: its reference list, the sentinel, or the failure.
fn print_report(report: &DeckReport) {
    for slide in &report.slides {
        println!("## Slide {}", slide.slide_number);
        println!();
        match (&slide.result, &slide.error) {
            (Some(result), _) => println!("{result}"),
            (None, Some(err)) => println!("{}", red(&err.to_string())),
            (None, None) => println!("{}", dim("(not analysed)")),
        }
        println!();
    }
}
