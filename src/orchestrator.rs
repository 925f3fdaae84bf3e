//! Job orchestration.
//!
//! Drives one job through the full pipeline: load records, plan, partition,
//! generate per module, persist, publish, and report. The orchestrator owns
//! the failure policy — module-level generation failures are absorbed and
//! cost only their files, while plan rejection, empty output, and publish
//! failures are fatal. A fatal error is persisted on the job row and echoed
//! as a terminal error event; it never unwinds past [`Orchestrator::run_job`].

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::PacksmithConfig;
use crate::errors::PipelineError;
use crate::generator::{CodeModel, GenerationMode, ModuleBuilder};
use crate::ledger::LedgerHandle;
use crate::models::{GeneratedFile, Job, JobStatus, Plan, ProjectBrief, UserAccount};
use crate::modules::partition;
use crate::plan::parse_plan;
use crate::progress::{ProgressEvent, ProgressSink, ProgressTarget, Step};
use crate::publisher::{GitHostFactory, publish};

pub struct Orchestrator {
    ledger: LedgerHandle,
    builder: ModuleBuilder,
    model: Arc<dyn CodeModel>,
    hosts: Arc<dyn GitHostFactory>,
    sink: Arc<dyn ProgressSink>,
    config: PacksmithConfig,
}

impl Orchestrator {
    pub fn new(
        ledger: LedgerHandle,
        model: Arc<dyn CodeModel>,
        hosts: Arc<dyn GitHostFactory>,
        sink: Arc<dyn ProgressSink>,
        config: PacksmithConfig,
    ) -> Self {
        Self {
            ledger,
            builder: ModuleBuilder::new(model.clone()),
            model,
            hosts,
            sink,
            config,
        }
    }

    /// Run one job to a terminal state. Fatal pipeline errors are absorbed
    /// into the job row (`failed` + error message + terminal error event);
    /// only infrastructure failures around the job itself bubble up.
    pub async fn run_job(&self, job_id: &str) -> Result<JobStatus> {
        let id = job_id.to_string();
        let job = self
            .ledger
            .call(move |l| l.get_job(&id))
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))?;

        let target = ProgressTarget::new(job.id.clone(), job.callback_url.clone());

        match self.execute(&job, &target).await {
            Ok(()) => Ok(JobStatus::Completed),
            Err(e) => {
                error!("[orchestrator] job={} failed: {}", job.id, e);
                let message = e.to_string();
                let id = job.id.clone();
                let msg = message.clone();
                if let Err(le) = self
                    .ledger
                    .call(move |l| {
                        l.set_error(&id, &msg)?;
                        l.set_status(&id, JobStatus::Failed)?;
                        Ok(())
                    })
                    .await
                {
                    warn!(
                        "[orchestrator] job={}: failed to record terminal error: {}",
                        job.id, le
                    );
                }
                self.sink
                    .emit(
                        &target,
                        ProgressEvent::error(format!("An error occurred: {}", message)),
                    )
                    .await;
                Ok(JobStatus::Failed)
            }
        }
    }

    async fn execute(&self, job: &Job, target: &ProgressTarget) -> Result<(), PipelineError> {
        let job_id = job.id.clone();
        self.ledger
            .call(move |l| l.set_status(&job_id, JobStatus::InProgress).map(|_| ()))
            .await?;

        self.emit(target, Step::Start, "Fetching project data...").await;
        let (brief, user) = self.load_records(job).await?;

        self.emit(target, Step::Architect, "Designing the project blueprint...")
            .await;
        let plan = self.plan(&job.id, &brief).await?;

        self.emit(target, Step::BuildStart, "Code generation phase initiated.")
            .await;
        let (files, skipped_modules) = self.generate(target, &brief, &plan).await?;

        let planned = plan.file_structure.len();
        let generated = files.len();

        let job_id = job.id.clone();
        let to_save = files;
        self.ledger
            .call(move |l| l.save_files(&job_id, &to_save))
            .await?;
        // Publish from the durable record, not the in-memory set.
        let job_id = job.id.clone();
        let files = self.ledger.call(move |l| l.load_files(&job_id)).await?;

        self.emit(
            target,
            Step::Assembly,
            "All files generated. Pushing to GitHub...",
        )
        .await;
        let host = self.hosts.with_credential(&user.github_token);
        let repo = publish(
            host.as_ref(),
            &brief,
            &files,
            &self.config.publish_config(),
            self.sink.as_ref(),
            target,
        )
        .await?;

        let job_id = job.id.clone();
        self.ledger
            .call(move |l| l.set_status(&job_id, JobStatus::Completed).map(|_| ()))
            .await?;

        let mut message = format!("Success! Repository created: {}", repo.html_url);
        if generated < planned {
            message.push_str(&format!(
                " ({} of {} planned files generated, {} module(s) skipped)",
                generated, planned, skipped_modules
            ));
        }
        info!("[orchestrator] job={}: {}", job.id, message);
        self.sink.emit(target, ProgressEvent::done(message)).await;
        Ok(())
    }

    async fn load_records(&self, job: &Job) -> Result<(ProjectBrief, UserAccount), PipelineError> {
        let project_id = job.project_id;
        let brief = self
            .ledger
            .call(move |l| l.get_project(project_id))
            .await?
            .ok_or_else(|| PipelineError::record_not_found("project", job.project_id))?;
        let user_id = job.user_id;
        let user = self
            .ledger
            .call(move |l| l.get_user(user_id))
            .await?
            .ok_or_else(|| PipelineError::record_not_found("user", job.user_id))?;
        Ok((brief, user))
    }

    /// One planner call, validated and persisted. Plan problems are fatal;
    /// there is no repair loop for plans.
    async fn plan(&self, job_id: &str, brief: &ProjectBrief) -> Result<Plan, PipelineError> {
        let raw = self
            .model
            .plan_project(brief)
            .await
            .map_err(|e| PipelineError::Other(e.context("planner call failed")))?;
        let plan = parse_plan(&raw)?;

        let serialized = serde_json::to_string(&plan)
            .map_err(|e| PipelineError::Other(anyhow::Error::new(e)))?;
        let id = job_id.to_string();
        self.ledger
            .call(move |l| l.set_plan(&id, &serialized))
            .await?;
        info!(
            "[orchestrator] job={}: plan accepted with {} file tasks",
            job_id,
            plan.file_structure.len()
        );
        Ok(plan)
    }

    /// Generate every module in build order, accumulating files keyed by
    /// path (first occurrence wins). Returns the files plus how many
    /// modules produced nothing.
    async fn generate(
        &self,
        target: &ProgressTarget,
        brief: &ProjectBrief,
        plan: &Plan,
    ) -> Result<(Vec<GeneratedFile>, usize), PipelineError> {
        let modules = partition(&plan.file_structure);
        let mut files: Vec<GeneratedFile> = Vec::new();
        let mut skipped = 0usize;

        for module in &modules {
            self.emit(
                target,
                Step::BuildModule,
                format!("Generating {}...", module.kind.label()),
            )
            .await;

            let build = match self.config.generation_mode {
                GenerationMode::Sequential => self.builder.build_module(module, brief, plan).await,
                GenerationMode::Fanout => self.builder.build_fanout(module, brief, plan).await,
            };

            if build.failed {
                skipped += 1;
                warn!(
                    "[orchestrator] job={}: module {} produced no files, continuing",
                    target.job_id,
                    module.kind.as_str()
                );
                self.emit(
                    target,
                    Step::CompleteModule,
                    format!("{} produced no files and was skipped.", module.kind.label()),
                )
                .await;
                continue;
            }
            for file in build.files {
                if !files.iter().any(|f| f.path == file.path) {
                    files.push(file);
                }
            }
            self.emit(
                target,
                Step::CompleteModule,
                format!("{} complete.", module.kind.label()),
            )
            .await;
        }

        if files.is_empty() {
            return Err(PipelineError::NothingGenerated);
        }
        Ok((files, skipped))
    }

    async fn emit(&self, target: &ProgressTarget, step: Step, message: impl Into<String>) {
        self.sink.emit(target, ProgressEvent::step(step, message)).await;
    }
}
