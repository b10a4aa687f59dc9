//! Job pipeline integration tests.
//!
//! Every test runs against temp folders with an in-process synthesizer, so no
//! network access or API key is needed.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use daisy_braille_toolkit::{
    CancellationToken, JobManifest, JobStore, OutputMode, PipelineProgressCallback,
    PipelineRunner, PipelineStep, SegmentStatus, SpeechSynthesizer, StepStatus, SynthesisOutput,
    SynthesisRequest, ToolkitConfig, ToolkitError, TtsError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Counts calls; fails every request while `fail` is set.
#[derive(Default)]
struct FakeSynth {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeSynth {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TtsError::Http {
                status: 400,
                body: "bad request".into(),
            });
        }
        Ok(SynthesisOutput {
            audio: format!("AUDIO:{}", request.text).into_bytes(),
            raw_json: r#"{"alignment":null}"#.into(),
        })
    }
}

/// Cancels the token as soon as the first segment is done.
struct CancelAfterFirstSegment(CancellationToken);

impl PipelineProgressCallback for CancelAfterFirstSegment {
    fn on_segment_complete(&self, _index: usize, _total: usize, _from_cache: bool) {
        self.0.cancel();
    }
}

struct Env {
    tmp: TempDir,
    synth: Arc<FakeSynth>,
}

impl Env {
    fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().unwrap(),
            synth: Arc::new(FakeSynth::default()),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.tmp.path().join("cache")
    }

    fn jobs_dir(&self) -> PathBuf {
        self.tmp.path().join("jobs")
    }

    fn config(&self) -> ToolkitConfig {
        ToolkitConfig::builder()
            .cache_root(self.cache_dir())
            .api_max_chars(700)
            .synthesizer(self.synth.clone())
            .build()
            .unwrap()
    }

    fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(self.config()).unwrap()
    }

    fn document(&self, name: &str, text: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn new_job(&self, input: &Path, mode: OutputMode) -> JobManifest {
        JobStore::new()
            .create_new(input, &self.jobs_dir(), mode, &self.config(), "voice-1")
            .unwrap()
    }
}

/// Three paragraphs of ~300 chars; with a 500-char segment budget each
/// paragraph becomes its own segment.
fn three_paragraphs() -> String {
    ["Første", "Andet", "Tredje"]
        .iter()
        .map(|word| format!("{word} afsnit. {}", "Lorem ipsum dolor sit amet. ".repeat(10)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn reload(job: &JobManifest) -> JobManifest {
    JobStore::new().load(&job.output_root).unwrap()
}

// ── Full runs ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_produces_all_outputs() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let mut job = env.new_job(&input, OutputMode::Both);

    let summary = env
        .runner()
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.executed, PipelineStep::ALL.to_vec());
    assert_eq!(summary.segments_synthesized, 3);
    assert_eq!(summary.segments_from_cache, 0);
    assert_eq!(env.synth.calls(), 3);

    let root = &job.output_root;
    assert!(root.join("input/source.txt").is_file());
    assert!(root.join("dtbook/book.xml").is_file());
    assert!(root.join("tts/seg_0001.mp3").is_file());
    assert!(root.join("tts/seg_0003.mp3").is_file());
    assert!(root.join("tts/segments/0002.tts.txt").is_file());
    assert!(root.join("daisy/ncc.html").is_file());
    assert!(root.join("daisy/seg_0003.smil").is_file());
    assert!(root.join("braille/book.pef").is_file());
    assert!(root.join("metadata/metadata.csv").is_file());
    // No ISO tool configured
    assert!(!root.join("iso/output.iso").exists());

    let stored = reload(&job);
    assert!(stored.is_complete());
    assert_eq!(stored.tts.segments.len(), 3);
    assert!(stored
        .tts
        .segments
        .iter()
        .all(|s| s.status == SegmentStatus::Completed && !s.from_cache));
}

#[tokio::test]
async fn daisy_only_plan_skips_pef() {
    let env = Env::new();
    let input = env.document("bog.txt", "Kort tekst.");
    let mut job = env.new_job(&input, OutputMode::DaisyOnly);

    let summary = env
        .runner()
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!summary.executed.contains(&PipelineStep::PefBuild));
    assert!(job.output_root.join("daisy/ncc.html").is_file());
    assert!(!job.output_root.join("braille/book.pef").exists());
}

#[tokio::test]
async fn rerunning_a_finished_job_does_nothing() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let mut job = env.new_job(&input, OutputMode::Both);
    let runner = env.runner();
    runner
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    let mut job = reload(&job);
    let summary = runner
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.was_noop());
    assert_eq!(summary.skipped.len(), 6);
    assert_eq!(env.synth.calls(), 3);
}

// ── Cache ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_job_with_same_text_uses_cache() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let runner = env.runner();

    let mut first = env.new_job(&input, OutputMode::DaisyOnly);
    runner
        .run(&mut first, None, &CancellationToken::new())
        .await
        .unwrap();

    let mut second = env.new_job(&input, OutputMode::BrailleOnly);
    assert_ne!(first.output_root, second.output_root);
    let summary = runner
        .run(&mut second, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(env.synth.calls(), 3);
    assert_eq!(summary.segments_from_cache, 3);
    assert_eq!(summary.segments_synthesized, 0);
    assert!(second.tts.segments.iter().all(|s| s.from_cache));

    let a = std::fs::read(first.output_root.join("tts/seg_0002.mp3")).unwrap();
    let b = std::fs::read(second.output_root.join("tts/seg_0002.mp3")).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn edited_spoken_text_is_synthesized_again() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let runner = env.runner();
    let mut job = env.new_job(&input, OutputMode::DaisyOnly);
    runner
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    let spoken = job.output_root.join("tts/segments/0002.tts.txt");
    std::fs::write(&spoken, "Andet afsnit, rettet udtale.").unwrap();

    let mut job = reload(&job);
    let summary = runner
        .run(&mut job, Some(PipelineStep::Tts), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.segments_synthesized, 1);
    assert_eq!(summary.segments_from_cache, 0);
    assert_eq!(env.synth.calls(), 4);
    let audio = std::fs::read_to_string(job.output_root.join("tts/seg_0002.mp3")).unwrap();
    assert_eq!(audio, "AUDIO:Andet afsnit, rettet udtale.");
}

// ── Resume and forced start ──────────────────────────────────────────────────

#[tokio::test]
async fn forced_start_resets_later_steps() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let runner = env.runner();
    let mut job = env.new_job(&input, OutputMode::Both);
    runner
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();
    let import_finished = job.step(PipelineStep::Import).finished_utc;

    let summary = runner
        .run(&mut job, Some(PipelineStep::Tts), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary.skipped,
        vec![PipelineStep::Import, PipelineStep::DtBook]
    );
    assert_eq!(summary.executed.first(), Some(&PipelineStep::Tts));
    assert_eq!(summary.executed.len(), 4);
    // Segments come from the job folder, not the provider
    assert_eq!(env.synth.calls(), 3);
    assert_eq!(job.step(PipelineStep::Import).finished_utc, import_finished);
}

#[tokio::test]
async fn forced_step_outside_plan_is_rejected() {
    let env = Env::new();
    let input = env.document("bog.txt", "Tekst.");
    let mut job = env.new_job(&input, OutputMode::BrailleOnly);

    let err = env
        .runner()
        .run(
            &mut job,
            Some(PipelineStep::DaisyBuild),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ToolkitError::StepNotInPlan {
            step: PipelineStep::DaisyBuild,
            mode: OutputMode::BrailleOnly
        }
    ));
    assert_eq!(env.synth.calls(), 0);
    assert_eq!(
        reload(&job).step(PipelineStep::Import).status,
        StepStatus::NotStarted
    );
}

#[tokio::test]
async fn failed_tts_resumes_without_redoing_earlier_steps() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let runner = env.runner();
    let mut job = env.new_job(&input, OutputMode::Both);

    env.synth.fail.store(true, Ordering::SeqCst);
    let err = runner
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ToolkitError::StepFailed {
            step: PipelineStep::Tts,
            ..
        }
    ));
    // Non-transient errors are not retried
    assert_eq!(env.synth.calls(), 1);

    let stored = reload(&job);
    assert_eq!(stored.step(PipelineStep::Import).status, StepStatus::Completed);
    assert_eq!(stored.step(PipelineStep::Tts).status, StepStatus::Failed);
    assert!(stored
        .step(PipelineStep::Tts)
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("400"));
    assert_eq!(stored.tts.segments[0].status, SegmentStatus::Failed);
    assert_eq!(
        stored.step(PipelineStep::DaisyBuild).status,
        StepStatus::NotStarted
    );

    env.synth.fail.store(false, Ordering::SeqCst);
    let mut job = stored;
    let summary = runner
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary.skipped,
        vec![PipelineStep::Import, PipelineStep::DtBook]
    );
    assert_eq!(summary.segments_synthesized, 3);
    assert!(reload(&job).is_complete());
}

#[tokio::test]
async fn cancellation_keeps_finished_segments() {
    let env = Env::new();
    let input = env.document("bog.txt", &three_paragraphs());
    let cancel = CancellationToken::new();
    let config = ToolkitConfig::builder()
        .cache_root(env.cache_dir())
        .api_max_chars(700)
        .synthesizer(env.synth.clone())
        .progress_callback(Arc::new(CancelAfterFirstSegment(cancel.clone())))
        .build()
        .unwrap();
    let mut job = env.new_job(&input, OutputMode::Both);

    let err = PipelineRunner::new(config)
        .unwrap()
        .run(&mut job, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolkitError::Cancelled));
    assert_eq!(env.synth.calls(), 1);

    let stored = reload(&job);
    assert_eq!(stored.step(PipelineStep::Tts).status, StepStatus::Failed);
    assert_eq!(stored.tts.segments[0].status, SegmentStatus::Completed);
    assert_eq!(stored.tts.segments[1].status, SegmentStatus::Pending);

    let mut job = stored;
    let summary = env
        .runner()
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.segments_synthesized, 2);
    assert_eq!(env.synth.calls(), 3);
}

#[tokio::test]
async fn already_cancelled_token_runs_nothing() {
    let env = Env::new();
    let input = env.document("bog.txt", "Tekst.");
    let mut job = env.new_job(&input, OutputMode::Both);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = env.runner().run(&mut job, None, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(!job.output_root.join("input/source.txt").exists());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_api_key_fails_tts_step() {
    if std::env::var("ELEVENLABS_API_KEY").is_ok() {
        println!("SKIP: ELEVENLABS_API_KEY is set");
        return;
    }
    let env = Env::new();
    let input = env.document("bog.txt", "Tekst uden nøgle.");
    let config = ToolkitConfig::builder()
        .cache_root(env.cache_dir())
        .build()
        .unwrap();
    let mut job = env.new_job(&input, OutputMode::Both);

    let err = PipelineRunner::new(config)
        .unwrap()
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ToolkitError::StepFailed { step, source } => {
            assert_eq!(step, PipelineStep::Tts);
            assert!(matches!(*source, ToolkitError::Tts(TtsError::MissingApiKey)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        reload(&job).step(PipelineStep::DtBook).status,
        StepStatus::Completed
    );
}

#[tokio::test]
async fn empty_document_fails_import() {
    let env = Env::new();
    let input = env.document("tom.txt", "  \n\n  ");
    let mut job = env.new_job(&input, OutputMode::Both);

    let err = env
        .runner()
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ToolkitError::StepFailed {
            step: PipelineStep::Import,
            ..
        }
    ));
    assert_eq!(
        reload(&job).step(PipelineStep::Import).status,
        StepStatus::Failed
    );
}

#[cfg(unix)]
#[tokio::test]
async fn iso_tool_receives_mkisofs_arguments() {
    use daisy_braille_toolkit::IsoTool;

    let env = Env::new();
    let input = env.document("bog.txt", "Tekst til disken.");
    // `sh -c '…' iso -J -R -V <label> -o <out> …`: the output path is $6
    let tool = IsoTool::new("sh").arg("-c").arg(r#"echo "$4" > "$6""#).arg("iso");
    let config = ToolkitConfig::builder()
        .cache_root(env.cache_dir())
        .synthesizer(env.synth.clone())
        .iso_tool(tool)
        .build()
        .unwrap();
    let mut job = env.new_job(&input, OutputMode::Both);
    job.title = Some("Min bog".into());

    PipelineRunner::new(config)
        .unwrap()
        .run(&mut job, None, &CancellationToken::new())
        .await
        .unwrap();

    let iso = std::fs::read_to_string(job.output_root.join("iso/output.iso")).unwrap();
    assert_eq!(iso.trim(), "Minbog");
}
