//! Pipeline orchestrator
//!
//! Drives one job through its stages and narrates progress on the shared
//! broadcaster:
//!
//! PENDING → FETCHING → SEPARATING → MIXING → PUBLISHING → DONE
//!
//! Each stage is a `phase_*` method. External tools and audio work run on
//! the blocking pool so request handling and SSE streams stay responsive.
//!
//! Progress lines are exactly `Downloading...`, `Isolating...`, `Done`, or
//! `Error: <message>`. Every job that starts ends with exactly one terminal
//! line. Jobs are serialized: a second request waits for the job slot.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use guitarless_common::Broadcaster;

use super::fetcher::MediaFetcher;
use super::separator::StemSeparator;
use crate::audio::{codec, StemMixer};
use crate::config::PipelinePaths;
use crate::error::PipelineError;
use crate::models::{Artifacts, Job, JobInput, JobStatus, StemSet};

pub const MSG_DOWNLOADING: &str = "Downloading...";
pub const MSG_ISOLATING: &str = "Isolating...";
pub const MSG_DONE: &str = "Done";

/// Published file name of the isolated mix
pub const ISOLATED_FILE_NAME: &str = "Isolated_Guitar_Only.flac";

/// Published file name of the remainder mix
pub const REMAINDER_FILE_NAME: &str = "Guitarless.flac";

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub paths: PipelinePaths,
    /// Sources longer than this are rejected before download
    pub max_duration: Duration,
    /// Prefix for artifact URLs; `None` yields `/output/<file>`
    pub public_base_url: Option<String>,
    pub isolated_file_name: String,
    pub remainder_file_name: String,
}

impl OrchestratorSettings {
    pub fn new(paths: PipelinePaths, max_duration: Duration) -> Self {
        Self {
            paths,
            max_duration,
            public_base_url: None,
            isolated_file_name: ISOLATED_FILE_NAME.to_string(),
            remainder_file_name: REMAINDER_FILE_NAME.to_string(),
        }
    }

    pub fn with_public_base_url(mut self, base: Option<String>) -> Self {
        self.public_base_url = base.filter(|b| !b.trim().is_empty());
        self
    }

    /// Public URL of a published file
    pub fn artifact_url(&self, file_name: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/output/{}", base.trim_end_matches('/'), file_name),
            None => format!("/output/{}", file_name),
        }
    }
}

/// Result of a successful job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub job_name: String,
    pub isolated_mix_url: String,
    pub remainder_mix_url: String,
    pub artifacts: Artifacts,
}

/// Pipeline orchestrator service
pub struct PipelineOrchestrator {
    fetcher: Arc<dyn MediaFetcher>,
    separator: Arc<dyn StemSeparator>,
    mixer: StemMixer,
    broadcaster: Broadcaster,
    settings: OrchestratorSettings,
    /// Held for the whole of a job; the published names are shared
    job_slot: Mutex<()>,
}

impl PipelineOrchestrator {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        separator: Arc<dyn StemSeparator>,
        broadcaster: Broadcaster,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            fetcher,
            separator,
            mixer: StemMixer::new(),
            broadcaster,
            settings,
            job_slot: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Start a job on its own task
    ///
    /// The job runs to its terminal line even if the returned handle is
    /// dropped, so a caller that goes away never abandons a running job.
    pub fn submit(self: &Arc<Self>, input: JobInput) -> JoinHandle<Result<JobOutcome, PipelineError>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run(input).await })
    }

    /// Run one job to completion
    ///
    /// On failure the terminal `Error: ...` line has already been broadcast
    /// and the job's working files removed when this returns. Dropping the
    /// future mid-job skips both; callers that may go away use [`Self::submit`].
    pub async fn run(&self, input: JobInput) -> Result<JobOutcome, PipelineError> {
        let _slot = self.job_slot.lock().await;

        let mut job = Job::new(input);
        info!(job_id = %job.id, input = ?job.input, "Job started");

        match self.execute(&mut job).await {
            Ok(outcome) => {
                info!(
                    job_id = %job.id,
                    job_name = %outcome.job_name,
                    elapsed_ms = (chrono::Utc::now() - job.created_at).num_milliseconds(),
                    "Job completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.fail(&mut job, &err).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, job: &mut Job) -> Result<JobOutcome, PipelineError> {
        self.phase_fetching(job).await?;
        self.phase_separating(job).await?;
        let staged = self.phase_mixing(job).await?;
        self.phase_publishing(job, staged).await?;

        let artifacts = job.artifacts.clone().ok_or_else(|| {
            PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "artifacts missing after publish",
            ))
        })?;

        job.transition_to(JobStatus::Done);
        self.broadcaster.publish(MSG_DONE);

        Ok(JobOutcome {
            job_id: job.id,
            job_name: job.name.clone().unwrap_or_else(|| "untitled".to_string()),
            isolated_mix_url: self.settings.artifact_url(&self.settings.isolated_file_name),
            remainder_mix_url: self.settings.artifact_url(&self.settings.remainder_file_name),
            artifacts,
        })
    }

    /// FETCHING: metadata check, then download (URL) or probe (upload)
    async fn phase_fetching(&self, job: &mut Job) -> Result<(), PipelineError> {
        job.transition_to(JobStatus::Fetching);

        match job.input.clone() {
            JobInput::Url(url) => {
                let fetcher = Arc::clone(&self.fetcher);
                let query_url = url.clone();
                let metadata = offload(
                    move || fetcher.fetch_metadata(&query_url),
                    PipelineError::Fetch,
                )
                .await?;

                if let Some(duration) = metadata
                    .duration_seconds
                    .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
                {
                    self.check_duration(duration)?;
                }
                job.name = metadata.title;

                self.broadcaster.publish(MSG_DOWNLOADING);

                let fetcher = Arc::clone(&self.fetcher);
                let downloads = self.settings.paths.downloads.clone();
                let path = offload(
                    move || fetcher.fetch_media(&url, &downloads),
                    PipelineError::Fetch,
                )
                .await?;

                if job.name.is_none() {
                    job.name = file_stem_string(&path);
                }
                job.working_file = Some(path);
            }
            JobInput::Upload { path, file_name } => {
                // The upload is ours to delete from here on
                job.working_file = Some(path.clone());
                job.name = file_stem_string(Path::new(&file_name)).or(Some(file_name));

                let probe_path = path.clone();
                let duration = offload(
                    move || {
                        Ok(match codec::probe_duration(&probe_path) {
                            Ok(duration) => duration,
                            Err(e) => {
                                warn!(path = %probe_path.display(), error = %e, "Could not probe upload duration");
                                None
                            }
                        })
                    },
                    PipelineError::Fetch,
                )
                .await?;

                if let Some(duration) = duration {
                    self.check_duration(duration)?;
                }
            }
        }

        debug!(job_id = %job.id, working_file = ?job.working_file, "Source ready");
        Ok(())
    }

    /// SEPARATING: run the separation engine on the working file
    async fn phase_separating(&self, job: &mut Job) -> Result<(), PipelineError> {
        job.transition_to(JobStatus::Separating);
        self.broadcaster.publish(MSG_ISOLATING);

        let working = job.working_file.clone().ok_or_else(|| {
            PipelineError::Separation("No source audio to separate".to_string())
        })?;

        let separator = Arc::clone(&self.separator);
        let stems = offload(move || separator.separate(&working), PipelineError::Separation).await?;

        debug!(job_id = %job.id, directory = %stems.directory.display(), "Stems located");
        job.stage_outputs = Some(stems);
        Ok(())
    }

    /// MIXING: write both mixes to staging files in the output directory
    async fn phase_mixing(&self, job: &mut Job) -> Result<Artifacts, PipelineError> {
        job.transition_to(JobStatus::Mixing);

        let stems = job
            .stage_outputs
            .clone()
            .ok_or_else(|| PipelineError::Mix("No stems to mix".to_string()))?;

        let output = &self.settings.paths.output;
        let staged = Artifacts {
            isolated: output.join(format!(".{}.isolated.part", job.id)),
            remainder: output.join(format!(".{}.remainder.part", job.id)),
        };

        let mixer = self.mixer.clone();
        let targets = staged.clone();
        let result = offload(
            move || mixer.mix_files(&stems, &targets.isolated, &targets.remainder),
            PipelineError::Mix,
        )
        .await;

        match result {
            Ok(summary) => {
                debug!(job_id = %job.id, ?summary, "Mixes staged");
                Ok(staged)
            }
            Err(err) => {
                remove_quietly(&staged.isolated);
                remove_quietly(&staged.remainder);
                Err(err)
            }
        }
    }

    /// PUBLISHING: move staged mixes into place, then delete intermediates
    async fn phase_publishing(&self, job: &mut Job, staged: Artifacts) -> Result<(), PipelineError> {
        job.transition_to(JobStatus::Publishing);

        let output = &self.settings.paths.output;
        let published = Artifacts {
            isolated: output.join(&self.settings.isolated_file_name),
            remainder: output.join(&self.settings.remainder_file_name),
        };

        publish_pair(&staged, &published).await?;
        job.artifacts = Some(published);

        if let Some(stems) = job.stage_outputs.take() {
            remove_stems(&stems).await?;
        }
        if let Some(working) = job.working_file.take() {
            remove_if_exists(&working).await?;
        }

        Ok(())
    }

    fn check_duration(&self, duration: Duration) -> Result<(), PipelineError> {
        if duration > self.settings.max_duration {
            return Err(PipelineError::PolicyViolation(format!(
                "Song is longer than {} minutes ({}). Please choose a shorter song.",
                self.settings.max_duration.as_secs() / 60,
                format_duration(duration)
            )));
        }
        Ok(())
    }

    /// Terminal failure: mark, broadcast, clean up
    async fn fail(&self, job: &mut Job, err: &PipelineError) {
        let stage = job.status;
        job.transition_to(JobStatus::Failed);

        match err {
            PipelineError::PolicyViolation(_) => {
                warn!(job_id = %job.id, ?stage, kind = err.kind(), "Job rejected: {}", err)
            }
            _ => error!(job_id = %job.id, ?stage, kind = err.kind(), "Job failed: {}", err),
        }

        self.broadcaster.publish(format!("Error: {}", err));

        if let Some(stems) = job.stage_outputs.take() {
            if let Err(e) = remove_stems(&stems).await {
                warn!(job_id = %job.id, error = %e, "Failed to remove stems after failure");
            }
        }
        if let Some(working) = job.working_file.take() {
            if let Err(e) = remove_if_exists(&working).await {
                warn!(job_id = %job.id, error = %e, "Failed to remove source audio after failure");
            }
        }
    }
}

/// Run blocking work on the blocking pool
///
/// A panicked or cancelled worker becomes an error of the stage's kind.
async fn offload<T, F>(task: F, stage_error: fn(String) -> PipelineError) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| stage_error(format!("Worker task failed: {}", e)))?
}

/// Rename both staged files into place, or neither
async fn publish_pair(staged: &Artifacts, published: &Artifacts) -> Result<(), PipelineError> {
    if let Err(e) = tokio::fs::rename(&staged.isolated, &published.isolated).await {
        remove_quietly(&staged.isolated);
        remove_quietly(&staged.remainder);
        return Err(e.into());
    }

    if let Err(e) = tokio::fs::rename(&staged.remainder, &published.remainder).await {
        // Neither the new pair nor a half of the previous one stays published
        remove_quietly(&published.isolated);
        remove_quietly(&published.remainder);
        remove_quietly(&staged.remainder);
        return Err(e.into());
    }

    info!(
        isolated = %published.isolated.display(),
        remainder = %published.remainder.display(),
        "Artifacts published"
    );
    Ok(())
}

/// Delete the stem files and their per-source directory
async fn remove_stems(stems: &StemSet) -> Result<(), PipelineError> {
    for path in stems.paths() {
        remove_if_exists(path).await?;
    }
    match tokio::fs::remove_dir_all(&stems.directory).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

fn file_stem_string(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

/// `m:ss`
fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}
