//! CLI binary for daisy-braille-toolkit.
//!
//! A thin shim over the library crate: maps flags and the persisted
//! [`AppSettings`] to a `ToolkitConfig`, drives jobs and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use daisy_braille_toolkit::pipeline::{import, segment};
use daisy_braille_toolkit::{
    AppSettings, CancellationToken, ElevenLabsClient, IsoTool, JobManifest, JobStore, OutputMode,
    PipelineProgressCallback, PipelineRunner, PipelineStep, ProgressCallback, RunSummary,
    SegmentStatus, SettingsStore, StepStatus, ToolkitConfig, ToolkitError,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the whole job (0–1000 permille)
/// plus a log line per finished step.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(1000);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {percent:>3}%  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Job");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    /// Clear the bar so following messages print on a clean line.
    fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, steps: &[PipelineStep]) {
        let names: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running {}", names.join(" → ")))
        ));
    }

    fn on_progress(&self, fraction: f64, message: &str) {
        self.bar
            .set_position((fraction.clamp(0.0, 1.0) * 1000.0).round() as u64);
        self.bar.set_message(message.to_string());
    }

    fn on_step_start(&self, step: PipelineStep, _position: usize, _total: usize) {
        self.bar.set_prefix(step.to_string());
    }

    fn on_step_complete(&self, step: PipelineStep, position: usize, total: usize) {
        self.bar.println(format!(
            "  {} {:<11} {}",
            green("✓"),
            step.to_string(),
            dim(&format!("{position}/{total}"))
        ));
    }

    fn on_step_error(&self, step: PipelineStep, error: &str) {
        let msg: String = error.lines().next().unwrap_or_default().chars().take(100).collect();
        self.bar
            .println(format!("  {} {:<11} {}", red("✗"), step.to_string(), red(&msg)));
    }

    fn on_segment_complete(&self, index: usize, total: usize, from_cache: bool) {
        let source = if from_cache { "cache" } else { "ElevenLabs" };
        self.bar
            .set_message(format!("segment {index}/{total} ({source})"));
    }

    fn on_run_complete(&self, _executed: usize) {
        self.finish();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Create a job and run it in one go
  dbt run bog.docx --voice <VOICE_ID> -o jobs/

  # Resume an interrupted or failed job
  dbt run jobs/Job_2026-10-18_093015

  # Redo everything from the TTS step (segments already in the cache are reused)
  dbt run jobs/Job_2026-10-18_093015 --from tts

  # Preview how a document will be split for TTS
  dbt segment bog.docx

  # Fetch the voice list and remember a default voice
  dbt voices --refresh
  dbt settings --voice <VOICE_ID> --iso-command "xorriso -as mkisofs"

ENVIRONMENT VARIABLES:
  ELEVENLABS_API_KEY   ElevenLabs API key
  DBT_DATA_DIR         Settings, voices list and default TTS cache location
  DBT_CACHE_DIR        Override the TTS cache directory
  DBT_ISO_COMMAND      mkisofs-compatible command used for output.iso
  RUST_LOG             Log filter (overrides --verbose)
"#;

/// Convert documents to DAISY talking books, Braille PEF and disc images.
#[derive(Parser, Debug)]
#[command(
    name = "dbt",
    version,
    about = "Convert documents to DAISY talking books, Braille PEF and disc images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DBT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DBT_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DBT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a job folder for a document without running it.
    New(NewArgs),
    /// Run a job: resume a job folder, or create a job for a document and run it.
    Run(RunArgs),
    /// Show the step and segment state of a job.
    Status {
        /// Job folder.
        job: PathBuf,
        /// Print the raw manifest.
        #[arg(long)]
        json: bool,
    },
    /// Show how a document would be split into TTS segments.
    Segment {
        /// .txt or .docx document.
        input: PathBuf,
        /// Provider character limit per request.
        #[arg(long, default_value_t = segment::DEFAULT_API_MAX_CHARS)]
        api_max_chars: usize,
    },
    /// List ElevenLabs voices (from the local list unless --refresh).
    Voices {
        /// Fetch the list from ElevenLabs and store it.
        #[arg(long)]
        refresh: bool,
        #[arg(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show or change the stored defaults.
    Settings(SettingsArgs),
}

#[derive(Args, Debug, Default)]
struct JobOptions {
    /// Folder under which the job folder is created.
    #[arg(short, long, env = "DBT_OUTPUT")]
    output: Option<PathBuf>,

    /// Outputs to produce.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// ElevenLabs voice id.
    #[arg(long, env = "DBT_VOICE")]
    voice: Option<String>,

    /// ElevenLabs model id.
    #[arg(long, env = "DBT_MODEL")]
    model: Option<String>,

    /// ElevenLabs output format, e.g. mp3_44100_128.
    #[arg(long, env = "DBT_OUTPUT_FORMAT")]
    format: Option<String>,

    /// Language tag, e.g. da-DK.
    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    author: Option<String>,

    /// Do not apply Danish pronunciation rules to the spoken text.
    #[arg(long)]
    no_text_rules: bool,
}

#[derive(Args, Debug)]
struct NewArgs {
    /// .txt or .docx document.
    input: PathBuf,

    #[command(flatten)]
    job: JobOptions,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Job folder to resume, or a .txt/.docx document to start a new job for.
    path: PathBuf,

    /// Restart from this step, resetting it and every later step.
    #[arg(long)]
    from: Option<PipelineStep>,

    #[command(flatten)]
    job: JobOptions,

    /// ElevenLabs API key.
    #[arg(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// TTS cache directory.
    #[arg(long, env = "DBT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// mkisofs-compatible command used for the disc image.
    #[arg(long, env = "DBT_ISO_COMMAND")]
    iso_command: Option<String>,

    /// Attempts after a transient ElevenLabs failure.
    #[arg(long, env = "DBT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-request ElevenLabs timeout in seconds.
    #[arg(long, env = "DBT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[arg(long)]
    voice: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    output_root: Option<PathBuf>,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Empty string clears it.
    #[arg(long)]
    iso_command: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Daisy,
    Braille,
    Both,
}

impl From<ModeArg> for OutputMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Daisy => OutputMode::DaisyOnly,
            ModeArg::Braille => OutputMode::BrailleOnly,
            ModeArg::Both => OutputMode::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for `run`; verbose always wins.
    let is_run = matches!(cli.command, Command::Run(_));
    let show_progress = is_run && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    let store = SettingsStore::default();
    let settings = store.load();

    match cli.command {
        Command::New(args) => {
            let job = create_job(&args.input, &args.job, &settings)?;
            println!("{}", job.output_root.display());
        }
        Command::Run(args) => run(args, &settings, show_progress, cli.quiet).await?,
        Command::Status { job, json } => status(&job, json)?,
        Command::Segment {
            input,
            api_max_chars,
        } => preview_segments(&input, api_max_chars)?,
        Command::Voices {
            refresh,
            api_key,
            json,
        } => voices(&store, refresh, api_key, json).await?,
        Command::Settings(args) => update_settings(&store, settings, args)?,
    }

    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────────────

fn create_job(input: &Path, opts: &JobOptions, settings: &AppSettings) -> Result<JobManifest> {
    let output_root = opts
        .output
        .clone()
        .or_else(|| settings.output_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let voice = opts
        .voice
        .clone()
        .unwrap_or_else(|| settings.voice_id.clone());
    if voice.trim().is_empty() {
        bail!("No voice selected. Pass --voice or run `dbt settings --voice <ID>`.");
    }

    let mut builder = settings.config_builder().apply_text_rules(!opts.no_text_rules);
    if let Some(m) = &opts.model {
        builder = builder.model_id(m);
    }
    if let Some(f) = &opts.format {
        builder = builder.output_format(f);
    }
    if let Some(l) = &opts.language {
        builder = builder.language(l);
    }
    let config = builder.build().context("Invalid configuration")?;

    let store = JobStore::new();
    let mode = opts.mode.map(OutputMode::from).unwrap_or(settings.mode);
    let mut job = store
        .create_new(input, &output_root, mode, &config, &voice)
        .with_context(|| format!("Failed to create job for {}", input.display()))?;

    if opts.title.is_some() || opts.author.is_some() {
        if let Some(t) = &opts.title {
            job.title = Some(t.clone());
        }
        if let Some(a) = &opts.author {
            job.author = Some(a.clone());
        }
        store
            .save(&job.output_root, &job)
            .context("Failed to save job manifest")?;
    }
    Ok(job)
}

fn mark_stale(stale: &mut Option<PipelineStep>, step: PipelineStep) {
    *stale = Some(stale.map_or(step, |s| s.min(step)));
}

/// Apply job options given with `run <job folder>` to the loaded manifest.
///
/// Returns the earliest step whose output the changes make stale.
fn apply_job_options(job: &mut JobManifest, opts: &JobOptions) -> Option<PipelineStep> {
    let mut stale = None;

    let tts = &mut job.tts.settings;
    for (value, field) in [
        (&opts.voice, &mut tts.voice_id),
        (&opts.model, &mut tts.model_id),
        (&opts.format, &mut tts.output_format),
    ] {
        if let Some(v) = value.as_ref().filter(|v| v.as_str() != field.as_str()) {
            field.clone_from(v);
            mark_stale(&mut stale, PipelineStep::Tts);
        }
    }
    if opts.no_text_rules && tts.apply_text_rules {
        tts.apply_text_rules = false;
        mark_stale(&mut stale, PipelineStep::Tts);
    }

    if let Some(lang) = opts.language.as_ref().filter(|l| **l != job.language) {
        job.language.clone_from(lang);
        mark_stale(&mut stale, PipelineStep::DtBook);
    }
    for (value, field) in [(&opts.title, &mut job.title), (&opts.author, &mut job.author)] {
        if value.is_some() && value.as_ref() != field.as_ref() {
            field.clone_from(value);
            mark_stale(&mut stale, PipelineStep::DtBook);
        }
    }

    if let Some(mode) = opts.mode.map(OutputMode::from).filter(|m| *m != job.mode) {
        job.mode = mode;
        mark_stale(&mut stale, PipelineStep::IsoAndCsv);
    }
    stale
}

/// Step to restart from so that `stale` outputs are rebuilt.
///
/// `None` when a plain resume reaches `stale` anyway.
fn restart_point(job: &JobManifest, stale: Option<PipelineStep>) -> Option<PipelineStep> {
    let stale = stale?;
    match PipelineRunner::first_incomplete(job) {
        Some(first) if first <= stale => None,
        _ => Some(stale),
    }
}

async fn run(args: RunArgs, settings: &AppSettings, show_progress: bool, quiet: bool) -> Result<()> {
    let store = JobStore::new();
    let mut from = args.from;
    let mut job = if args.path.is_dir() {
        let mut job = store
            .load(&args.path)
            .with_context(|| format!("Failed to load job in {}", args.path.display()))?;
        if args.job.output.is_some() && !quiet {
            eprintln!("{} --output is ignored when resuming a job folder", yellow("⚠"));
        }
        let stale = apply_job_options(&mut job, &args.job);
        if stale.is_some() {
            store
                .save(&job.output_root, &job)
                .context("Failed to save job manifest")?;
        }
        if let Some(step) = restart_point(&job, stale) {
            if !quiet && from.is_none_or(|f| f > step) {
                eprintln!("{} Job options changed, restarting from {step}", cyan("◆"));
            }
            from = Some(from.map_or(step, |f| f.min(step)));
        }
        job
    } else {
        let job = create_job(&args.path, &args.job, settings)?;
        if !quiet {
            eprintln!("{} Created {}", cyan("◆"), bold(&job.output_root.display().to_string()));
        }
        job
    };

    let mut builder = settings
        .config_builder()
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout);
    if let Some(key) = args.api_key {
        builder = builder.api_key(key);
    }
    if let Some(dir) = args.cache_dir {
        builder = builder.cache_root(dir);
    }
    if let Some(tool) = args
        .iso_command
        .as_deref()
        .and_then(IsoTool::from_command_line)
    {
        builder = builder.iso_tool(tool);
    }
    let progress = show_progress.then(CliProgressCallback::new);
    if let Some(cb) = &progress {
        builder = builder.progress_callback(Arc::clone(cb) as ProgressCallback);
    }
    let config: ToolkitConfig = builder.build().context("Invalid configuration")?;
    let runner = PipelineRunner::new(config).context("Failed to open TTS cache")?;

    // Ctrl-C stops before the next segment; the job stays resumable.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = runner.run(&mut job, from, &cancel).await;
    report_outcome(result, &job, quiet, progress.as_deref())
}

/// Print the result of a run, clearing the progress bar first.
fn report_outcome(
    result: Result<RunSummary, ToolkitError>,
    job: &JobManifest,
    quiet: bool,
    progress: Option<&CliProgressCallback>,
) -> Result<()> {
    if let Some(cb) = progress {
        cb.finish();
    }
    match result {
        Ok(summary) => {
            if !quiet {
                if summary.was_noop() {
                    eprintln!("{} Nothing to do, every step is completed", green("✔"));
                } else {
                    eprintln!(
                        "{} {} steps run  {} segments synthesized  {} from cache  →  {}",
                        green("✔"),
                        summary.executed.len(),
                        summary.segments_synthesized,
                        summary.segments_from_cache,
                        bold(&job.output_root.display().to_string()),
                    );
                }
            }
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            eprintln!(
                "{} Cancelled. Resume with: dbt run {}",
                yellow("⚠"),
                job.output_root.display()
            );
            Ok(())
        }
        Err(e @ ToolkitError::StepFailed { .. }) => Err(e).with_context(|| {
            format!(
                "Job stopped. Fix the cause and resume with: dbt run {}",
                job.output_root.display()
            )
        }),
        Err(e) => Err(e).context("Job failed"),
    }
}

fn status(job_dir: &Path, json: bool) -> Result<()> {
    let job = JobStore::new()
        .load(job_dir)
        .with_context(|| format!("Failed to load job in {}", job_dir.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&job).context("Failed to serialise manifest")?
        );
        return Ok(());
    }

    println!("Job:       {}", job.job_id);
    println!("Folder:    {}", job.output_root.display());
    println!("Title:     {}", job.display_title());
    println!("Mode:      {}", job.mode);
    println!("Language:  {}", job.language);
    println!(
        "Voice:     {} ({}, {})",
        job.tts.settings.voice_id, job.tts.settings.model_id, job.tts.settings.output_format
    );
    println!();
    for step in job.plan() {
        let state = job.step(step);
        let mark = match state.status {
            StepStatus::Completed => green("✓"),
            StepStatus::Failed => red("✗"),
            StepStatus::Running => yellow("…"),
            StepStatus::NotStarted => dim("·"),
        };
        println!("  {mark} {:<11} {:?}", step.to_string(), state.status);
        if let Some(err) = &state.error {
            println!("      {}", red(err.lines().next().unwrap_or_default()));
        }
    }

    let segs = &job.tts.segments;
    if !segs.is_empty() {
        let done = segs
            .iter()
            .filter(|s| s.status == SegmentStatus::Completed)
            .count();
        let cached = segs.iter().filter(|s| s.from_cache).count();
        println!();
        println!("Segments:  {done}/{} done ({cached} from cache)", segs.len());
    }
    Ok(())
}

fn preview_segments(input: &Path, api_max_chars: usize) -> Result<()> {
    let text = import::extract_text(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let max = segment::safe_max_chars(api_max_chars);
    let chunks = segment::split_for_tts(&text, max);

    println!(
        "{} chars → {} segments (max {} chars each)",
        text.chars().count(),
        chunks.len(),
        max
    );
    for (i, chunk) in chunks.iter().enumerate() {
        let first_line: String = chunk.lines().next().unwrap_or_default().chars().take(60).collect();
        println!(
            "  {:04}  {:>5}  {}",
            i + 1,
            chunk.chars().count(),
            dim(&first_line)
        );
    }
    Ok(())
}

async fn voices(store: &SettingsStore, refresh: bool, api_key: Option<String>, json: bool) -> Result<()> {
    let cached = store.load_voices().context("Failed to read voices list")?;
    let list = match cached {
        Some(cache) if !refresh => cache,
        _ => {
            let mut builder = ToolkitConfig::builder();
            if let Some(key) = api_key {
                builder = builder.api_key(key);
            }
            let config = builder.build().context("Invalid configuration")?;
            let client = ElevenLabsClient::from_config(&config).context("Cannot reach ElevenLabs")?;
            let voices = client.list_voices().await.context("Failed to list voices")?;
            store.save_voices(voices).context("Failed to store voices list")?
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&list).context("Failed to serialise voices")?
        );
        return Ok(());
    }

    println!(
        "{} voices {}",
        list.voices.len(),
        dim(&format!("(synced {})", list.synced_utc.format("%Y-%m-%d %H:%M UTC")))
    );
    let mut language = "";
    for v in &list.voices {
        if v.language_for_filter() != language {
            language = v.language_for_filter();
            println!("{}", bold(language));
        }
        let accent = if v.accent.is_empty() {
            String::new()
        } else {
            dim(&format!("({})", v.accent))
        };
        println!("  {:<24} {} {}", v.voice_id, v.name, accent);
    }
    Ok(())
}

fn update_settings(store: &SettingsStore, mut settings: AppSettings, args: SettingsArgs) -> Result<()> {
    let before = settings.clone();
    if let Some(v) = args.voice {
        settings.voice_id = v;
    }
    if let Some(v) = args.model {
        settings.model_id = v;
    }
    if let Some(v) = args.format {
        settings.output_format = v;
    }
    if let Some(v) = args.language {
        settings.language = v;
    }
    if let Some(v) = args.mode {
        settings.mode = v.into();
    }
    if let Some(v) = args.output_root {
        settings.output_root = Some(v);
    }
    if let Some(v) = args.cache_dir {
        settings.cache_dir = Some(v);
    }
    if let Some(v) = args.iso_command {
        settings.iso_command = if v.trim().is_empty() { None } else { Some(v) };
    }

    if settings != before {
        store.save(&settings).context("Failed to save settings")?;
        eprintln!("{} Saved {}", green("✔"), store.settings_path().display());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&settings).context("Failed to serialise settings")?
    );
    Ok(())
}
