//! End-to-end execution of one job.
//!
//! A job is admitted through the gate, gets a private workspace, stages its inputs from the object
//! store, runs its script, and publishes its outputs. The gate is released and the workspace
//! removed on every path out of `run`.

use crate::command::{CommandSettings, CommandSpec};
use crate::errors::{JobError, Result};
use crate::events::JobState;
use crate::gate::{AdmissionGate, AdmissionPermit};
use crate::request::{GenerateJob, JobRequest, PreprocessJob};
use crate::storage::{ObjectStore, TransferClient};
use crate::supervisor::ProcessExecution;
use crate::types::JobId;
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tracing::{error, info, warn};
use walkdir::WalkDir;

const PREPROCESS_RESULT_DIR: &str = "preprocess_result";
const GENERATE_RESULT_DIR: &str = "generate_video";
const INPUT_DIR: &str = "inputs";
const PREPROCESS_OUTPUT_DIR: &str = "preprocess_output";

/// Immutable settings shared by every job.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub command: CommandSettings,
    /// Bucket receiving every upload.
    pub output_bucket: String,
    /// Key prefix under which results are published.
    pub upload_prefix: String,
    /// Parent of the per-job workspaces.
    pub workspace_root: PathBuf,
    pub gate_timeout: Duration,
    pub process_timeout: Duration,
    pub url_expiry: Duration,
    /// Output lines buffered between the process readers and the log sink.
    pub line_capacity: usize,
}

/// What a successful job reports back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub message: String,
    pub artifacts: Vec<wire::OutputFile>,
    /// Remote prefix holding every artifact; preprocess jobs only.
    pub file_prefix: Option<String>,
}

impl From<JobOutcome> for wire::PreprocessResponse {
    fn from(outcome: JobOutcome) -> Self {
        Self {
            message: outcome.message,
            output_s3_paths: outcome.artifacts,
            file_prefix: outcome.file_prefix.unwrap_or_default(),
        }
    }
}

impl From<JobOutcome> for wire::GenerateResponse {
    fn from(outcome: JobOutcome) -> Self {
        Self {
            message: outcome.message,
            output_s3_paths: outcome.artifacts,
        }
    }
}

/// The gate slot and workspace held by one admitted job.
///
/// Fields drop in declaration order, so even on unwind the gate is freed before the workspace
/// goes away.
struct Admission {
    permit: AdmissionPermit,
    workspace: Workspace,
}

impl Admission {
    fn finish(self) {
        let Admission { permit, workspace } = self;
        permit.release();
        let (job_id, root) = (workspace.id(), workspace.root().to_path_buf());
        if let Err(err) = workspace.destroy() {
            warn!(%job_id, root = %root.display(), error = %err, "workspace removal failed");
        }
    }
}

pub struct Orchestrator<S: ?Sized> {
    gate: AdmissionGate,
    transfers: TransferClient<S>,
    settings: Arc<PipelineSettings>,
}

impl<S: ObjectStore + ?Sized> Orchestrator<S> {
    pub fn new(gate: AdmissionGate, store: Arc<S>, settings: Arc<PipelineSettings>) -> Self {
        let transfers = TransferClient::new(store, settings.output_bucket.clone());
        Self {
            gate,
            transfers,
            settings,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Run one job to completion.
    pub async fn run(&self, request: JobRequest) -> Result<JobOutcome> {
        let kind = request.kind();
        let permit = self.gate.acquire(self.settings.gate_timeout).await.map_err(|err| {
            warn!(kind, "rejected, another job is running");
            err
        })?;
        let workspace = Workspace::create(&self.settings.workspace_root).await?;
        let admission = Admission { permit, workspace };

        let job_id = admission.workspace.id();
        transition(job_id, JobState::Admitted);
        info!(%job_id, kind, "job started");

        let result = match &request {
            JobRequest::Preprocess(job) => self.preprocess(job_id, &admission.workspace, job).await,
            JobRequest::Generate(job) => self.generate(job_id, &admission.workspace, job).await,
        };
        admission.finish();

        match &result {
            Ok(outcome) => {
                transition(job_id, JobState::Done);
                info!(%job_id, kind, artifacts = outcome.artifacts.len(), "job finished");
            }
            Err(err) => {
                transition(job_id, JobState::Failed);
                error!(%job_id, kind, error = %err, "job failed");
            }
        }
        result
    }

    async fn preprocess(
        &self,
        job_id: JobId,
        workspace: &Workspace,
        job: &PreprocessJob,
    ) -> Result<JobOutcome> {
        let inputs = workspace.root().join(INPUT_DIR);
        let video = self.transfers.download_object(&job.video, &inputs).await?;
        let refer = self.transfers.download_object(&job.refer, &inputs).await?;
        let save_dir = workspace.root().join(PREPROCESS_OUTPUT_DIR);
        tokio::fs::create_dir_all(&save_dir)
            .await
            .map_err(JobError::Workspace)?;
        transition(job_id, JobState::InputsStaged);

        let spec = self
            .settings
            .command
            .preprocess(job, &video, &refer, &save_dir);
        self.run_script(job_id, &spec).await?;

        let relative_root = format!("{PREPROCESS_RESULT_DIR}/{job_id}");
        let file_prefix = format!("{}/{relative_root}", self.upload_root());
        let mut artifacts = vec![];
        for (local, relative) in output_files(&save_dir) {
            let remote_prefix = match relative.rsplit_once('/') {
                Some((dir, _)) => format!("{file_prefix}/{dir}"),
                None => file_prefix.clone(),
            };
            match self
                .transfers
                .upload_and_publish(&local, &remote_prefix, self.settings.url_expiry)
                .await
            {
                Some(artifact) => artifacts.push(wire::OutputFile {
                    file: format!("{relative_root}/{relative}"),
                    url: artifact.url,
                }),
                None => warn!(%job_id, path = %local.display(), "output not published"),
            }
        }
        transition(job_id, JobState::OutputsCollected);

        Ok(JobOutcome {
            message: "Preprocessing completed successfully".to_string(),
            artifacts,
            file_prefix: Some(file_prefix),
        })
    }

    async fn generate(
        &self,
        job_id: JobId,
        workspace: &Workspace,
        job: &GenerateJob,
    ) -> Result<JobOutcome> {
        let src_root = self
            .transfers
            .download_prefix(&job.src_root, &workspace.root().join(INPUT_DIR))
            .await?;
        transition(job_id, JobState::InputsStaged);

        let save_file = workspace.root().join(format!("{job_id}_output.mp4"));
        let spec = self.settings.command.generate(job, &src_root, &save_file);
        self.run_script(job_id, &spec).await?;

        if tokio::fs::metadata(&save_file).await.is_err() {
            return Err(JobError::MissingOutput(save_file.display().to_string()));
        }
        let remote_prefix = format!("{}/{GENERATE_RESULT_DIR}/{job_id}", self.upload_root());
        let artifacts = match self
            .transfers
            .upload_and_publish(&save_file, &remote_prefix, self.settings.url_expiry)
            .await
        {
            Some(artifact) => vec![wire::OutputFile {
                file: file_name(&save_file),
                url: artifact.url,
            }],
            None => {
                warn!(%job_id, path = %save_file.display(), "generated video not published");
                vec![]
            }
        };
        transition(job_id, JobState::OutputsCollected);

        Ok(JobOutcome {
            message: "Generation completed successfully".to_string(),
            artifacts,
            file_prefix: None,
        })
    }

    /// Run `spec` to completion, forwarding its output to the log. A child still running at the
    /// process timeout is killed.
    async fn run_script(&self, job_id: JobId, spec: &CommandSpec) -> Result<()> {
        info!(%job_id, command = %spec, "executing");
        let mut execution = ProcessExecution::spawn(spec, self.settings.line_capacity)?;
        transition(job_id, JobState::Running);

        let deadline = tokio::time::sleep(self.settings.process_timeout);
        tokio::pin!(deadline);
        let mut timed_out = false;
        loop {
            select! {
                line = execution.next_line() => match line {
                    Some(line) => info!(%job_id, "{line}"),
                    None => break,
                },
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    warn!(%job_id, timeout = ?self.settings.process_timeout, "process timed out, killing it");
                    if let Err(err) = execution.stop().await {
                        warn!(%job_id, error = %err, "could not stop process");
                    }
                }
            }
        }

        let code = execution.exit_code();
        if code != 0 || timed_out {
            error!(%job_id, code, timed_out, "script failed");
            return Err(JobError::Script { code, timed_out });
        }
        Ok(())
    }

    fn upload_root(&self) -> &str {
        self.settings.upload_prefix.trim_end_matches('/')
    }
}

fn transition(job_id: JobId, state: JobState) {
    info!(%job_id, %state, "job state changed");
}

/// Every regular file below `dir`, paired with its `/`-separated path relative to `dir`.
fn output_files(dir: &Path) -> Vec<(PathBuf, String)> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable output entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(dir).ok()?;
            let relative = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Some((entry.path().to_path_buf(), relative))
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
