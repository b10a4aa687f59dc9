//! The pipeline runner: resumable, step-checkpointed job execution.
//!
//! [`PipelineRunner::run`] walks the job's step plan from the first step that
//! is not completed, persisting the manifest before and after every step so
//! that a crash or failure leaves `job.json` describing exactly where to pick
//! up. Nothing is retried at step level; the caller resumes by running again.

use crate::cache::TtsCache;
use crate::config::ToolkitConfig;
use crate::elevenlabs::ElevenLabsClient;
use crate::error::ToolkitError;
use crate::manifest::{JobManifest, PipelineStep, SegmentStatus, StepState, StepStatus};
use crate::pipeline::{daisy, import, package, placeholders, tts};
use crate::progress::{NoopProgressCallback, PipelineProgressCallback};
use crate::store::JobStore;
use crate::synth::SpeechSynthesizer;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one call to [`PipelineRunner::run`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps executed in this run, in order.
    pub executed: Vec<PipelineStep>,
    /// Planned steps skipped because they were already completed.
    pub skipped: Vec<PipelineStep>,
    /// Segments that needed a provider call.
    pub segments_synthesized: usize,
    /// Segments served from the TTS cache.
    pub segments_from_cache: usize,
}

impl RunSummary {
    /// True when the run found nothing left to do.
    pub fn was_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Executes job step plans.
#[derive(Debug)]
pub struct PipelineRunner {
    config: ToolkitConfig,
    store: JobStore,
    cache: TtsCache,
}

impl PipelineRunner {
    /// Create a runner, opening the TTS cache at the configured location.
    pub fn new(config: ToolkitConfig) -> Result<Self, ToolkitError> {
        let cache = TtsCache::open(config.cache_root.as_deref())?;
        debug!("TTS cache at {}", cache.root().display());
        Ok(Self {
            config,
            store: JobStore::new(),
            cache,
        })
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    pub fn cache(&self) -> &TtsCache {
        &self.cache
    }

    /// First planned step that is not completed, `None` when all is done.
    ///
    /// `Running` counts as incomplete: it means an earlier process died mid-step.
    pub fn first_incomplete(job: &JobManifest) -> Option<PipelineStep> {
        let plan = job.plan();
        first_incomplete_index(&plan, job).map(|i| plan[i])
    }

    /// Run the job from its first incomplete step, or from `force_start_at`.
    ///
    /// Forcing a start step resets that step and every later one to
    /// `NotStarted` (persisted) before anything runs.
    ///
    /// # Errors
    /// * [`ToolkitError::StepNotInPlan`] if `force_start_at` is not planned for the job's mode
    /// * [`ToolkitError::StepFailed`] wrapping the cause when a step fails
    /// * [`ToolkitError::Cancelled`] when `cancel` fires
    pub async fn run(
        &self,
        job: &mut JobManifest,
        force_start_at: Option<PipelineStep>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, ToolkitError> {
        let cb = self.callback();
        let plan = job.plan();
        let total = plan.len();
        let job_dir = job.output_root.clone();
        let mut summary = RunSummary::default();
        let first_incomplete = first_incomplete_index(&plan, job);

        let start = match force_start_at {
            Some(step) => {
                let idx = plan
                    .iter()
                    .position(|s| *s == step)
                    .ok_or(ToolkitError::StepNotInPlan {
                        step,
                        mode: job.mode,
                    })?;
                for s in &plan[idx..] {
                    *job.step_mut(*s) = StepState::default();
                }
                self.store.save(&job_dir, job)?;
                info!("Forced restart at {} ({} steps reset)", step, total - idx);
                idx
            }
            None => match first_incomplete {
                Some(idx) => idx,
                None => {
                    info!("Job {} already complete", job.job_id);
                    summary.skipped = plan;
                    cb.on_progress(1.0, "All done");
                    return Ok(summary);
                }
            },
        };

        summary.skipped = plan[..start].to_vec();
        cb.on_run_start(&plan[start..]);
        info!(
            "Running job {} from {} ({} of {} steps)",
            job.job_id,
            plan[start],
            total - start,
            total
        );

        for (i, &step) in plan.iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                return Err(ToolkitError::Cancelled);
            }

            cb.on_step_start(step, i + 1, total);
            cb.on_progress(i as f64 / total as f64, &format!("Running: {step}"));

            {
                let state = job.step_mut(step);
                state.status = StepStatus::Running;
                state.started_utc = Some(Utc::now());
                state.finished_utc = None;
                state.error = None;
            }
            self.store.save(&job_dir, job)?;

            let result = self
                .execute_step(job, step, i, total, cancel, &mut summary)
                .await;

            let state = job.step_mut(step);
            state.finished_utc = Some(Utc::now());
            match result {
                Ok(()) => {
                    state.status = StepStatus::Completed;
                    self.store.save(&job_dir, job)?;
                    summary.executed.push(step);
                    cb.on_step_complete(step, i + 1, total);
                    info!("Step {} completed", step);
                }
                Err(e) => {
                    state.status = StepStatus::Failed;
                    state.error = Some(e.to_string());
                    if let Err(save_err) = self.store.save(&job_dir, job) {
                        warn!("Could not record failure of {}: {}", step, save_err);
                    }
                    cb.on_step_error(step, &e.to_string());
                    warn!("Step {} failed: {}", step, e);
                    return Err(match e {
                        ToolkitError::Cancelled => ToolkitError::Cancelled,
                        other => ToolkitError::StepFailed {
                            step,
                            source: Box::new(other),
                        },
                    });
                }
            }
        }

        cb.on_progress(1.0, "All done");
        cb.on_run_complete(summary.executed.len());
        info!(
            "Job {} done: {} steps run, {} synthesized, {} from cache",
            job.job_id,
            summary.executed.len(),
            summary.segments_synthesized,
            summary.segments_from_cache
        );
        Ok(summary)
    }

    async fn execute_step(
        &self,
        job: &mut JobManifest,
        step: PipelineStep,
        position: usize,
        total: usize,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), ToolkitError> {
        match step {
            PipelineStep::Import => {
                let out = import::import_source(job)?;
                debug!("Source text at {}", out.display());
            }
            PipelineStep::DtBook => {
                let text = import::load_source_text(job)?;
                placeholders::write_dtbook(job, &text)?;
            }
            PipelineStep::Tts => {
                self.run_tts(job, position, total, cancel, summary).await?;
            }
            PipelineStep::DaisyBuild => {
                daisy::build_daisy(job)?;
            }
            PipelineStep::PefBuild => {
                let text = import::load_source_text(job)?;
                placeholders::write_pef(job, &text)?;
            }
            PipelineStep::IsoAndCsv => {
                package::package_job(job, self.config.iso_tool.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn run_tts(
        &self,
        job: &mut JobManifest,
        position: usize,
        total_steps: usize,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), ToolkitError> {
        let cb = self.callback();
        let job_dir = job.output_root.clone();

        let text = import::load_source_text(job)?;
        let count = tts::prepare_segments(job, &text)?;
        self.store.save(&job_dir, job)?;

        let settings = job.tts.settings.clone();
        let mut synthesizer: Option<Arc<dyn SpeechSynthesizer>> = None;

        for n in 0..count {
            if cancel.is_cancelled() {
                info!("Cancelled before segment {}/{}", n + 1, count);
                return Err(ToolkitError::Cancelled);
            }

            let segment = job.tts.segments[n].clone();
            let audio = tts::segment_audio_path(&job_dir, segment.index, &settings.output_format);

            let from_cache = if segment.status == SegmentStatus::Completed && audio.is_file() {
                debug!("Segment {} already in place", segment.index);
                segment.from_cache
            } else {
                let result = tts::materialize_segment(
                    &self.cache,
                    &settings,
                    &segment,
                    &job_dir,
                    || self.synthesizer(&mut synthesizer),
                )
                .await;

                let from_cache = match result {
                    Ok(from_cache) => from_cache,
                    Err(e) => {
                        job.tts.segments[n].status = SegmentStatus::Failed;
                        self.store.save(&job_dir, job)?;
                        return Err(e);
                    }
                };

                let seg = &mut job.tts.segments[n];
                seg.status = SegmentStatus::Completed;
                seg.from_cache = from_cache;
                if from_cache {
                    summary.segments_from_cache += 1;
                } else {
                    summary.segments_synthesized += 1;
                }
                self.store.save(&job_dir, job)?;
                from_cache
            };

            cb.on_segment_complete(segment.index, count, from_cache);
            let fraction = (position as f64 + (n + 1) as f64 / count as f64) / total_steps as f64;
            cb.on_progress(fraction, &format!("TTS segment {}/{}", n + 1, count));
        }

        remove_stale_audio(&job_dir, count, &settings.output_format)?;
        Ok(())
    }

    /// The synthesizer for this run, created on first use.
    ///
    /// An injected synthesizer wins; otherwise an ElevenLabs client is built
    /// from the configured or environment API key.
    fn synthesizer(
        &self,
        slot: &mut Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Result<Arc<dyn SpeechSynthesizer>, ToolkitError> {
        if let Some(s) = slot {
            return Ok(Arc::clone(s));
        }
        let synth: Arc<dyn SpeechSynthesizer> = match &self.config.synthesizer {
            Some(s) => Arc::clone(s),
            None => Arc::new(ElevenLabsClient::from_config(&self.config)?),
        };
        *slot = Some(Arc::clone(&synth));
        Ok(synth)
    }

    fn callback(&self) -> Arc<dyn PipelineProgressCallback> {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }
}

/// Position in `plan` of the first step not completed.
fn first_incomplete_index(plan: &[PipelineStep], job: &JobManifest) -> Option<usize> {
    plan.iter().position(|s| !job.step(*s).is_completed())
}

/// Delete job audio of segments past `count` left by an earlier, longer split.
fn remove_stale_audio(job_dir: &Path, count: usize, output_format: &str) -> Result<(), ToolkitError> {
    let mut index = count + 1;
    loop {
        let audio = tts::segment_audio_path(job_dir, index, output_format);
        let json = audio.with_extension("json");
        if !audio.exists() && !json.exists() {
            return Ok(());
        }
        for p in [audio, json] {
            if p.exists() {
                std::fs::remove_file(&p).map_err(|e| ToolkitError::io(&p, e))?;
            }
        }
        index += 1;
    }
}
