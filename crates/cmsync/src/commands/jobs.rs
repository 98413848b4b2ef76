//! Saved flexible-sync job handlers.

use std::fmt::Write as _;
use std::path::Path;

use tabled::Tabled;

use cmsync_core::{FlexSyncRequest, JobDraft, SavedJob, SyncService};

use crate::cli::{GlobalOpts, JobsArgs, JobsCommand};
use crate::error::CliError;
use crate::output;

use super::sync::{ResultRow, result_id};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "CMS Model")]
    model: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Last Run")]
    last_run: String,
}

impl From<&SavedJob> for JobRow {
    fn from(job: &SavedJob) -> Self {
        Self {
            id: job.job_id.to_string(),
            name: job.name.clone(),
            model: job.config.cms_model_id.clone(),
            target: format!("{} / {}", job.config.target_mode, job.config.resource_mode),
            created: job.created_at.format("%Y-%m-%d %H:%M").to_string(),
            last_run: job
                .last_run
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        }
    }
}

fn job_detail(job: &SavedJob) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ID:        {}", job.job_id);
    let _ = writeln!(out, "Name:      {}", job.name);
    let _ = writeln!(out, "Created:   {}", job.created_at.to_rfc3339());
    let _ = writeln!(
        out,
        "Last run:  {}",
        job.last_run
            .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339())
    );
    let config = serde_json::to_string_pretty(&job.config).unwrap_or_default();
    let _ = write!(out, "Request:\n{config}");
    out
}

/// Parse a flexible-sync request from a JSON file.
fn read_request(path: &Path) -> Result<FlexSyncRequest, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CliError::Validation {
        field: "from-file".into(),
        reason: format!("invalid flexible-sync request: {e}"),
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    service: &SyncService,
    args: JobsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        JobsCommand::List => {
            let jobs = service.jobs().list().await;
            let out = output::render_list(
                &global.output,
                &jobs,
                |j| JobRow::from(j),
                |j| j.job_id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        JobsCommand::Show { job_id } => {
            let job = service.jobs().get(job_id).await?;
            let out = output::render_single(&global.output, &job, job_detail, |j| {
                j.job_id.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        JobsCommand::Create { name, from_file } => {
            let config = read_request(&from_file)?;
            let job = service.jobs().create(JobDraft { name, config }).await?;
            let out = output::render_single(&global.output, &job, job_detail, |j| {
                j.job_id.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        JobsCommand::Delete { job_id } => {
            service.jobs().delete(job_id).await?;
            if !global.quiet {
                eprintln!("Saved job {job_id} deleted");
            }
            Ok(())
        }

        JobsCommand::Run { job_id } => {
            let result = service.run_saved_job(job_id).await?;
            let color = output::should_color(&global.color);
            let results = [result];
            let out = output::render_list(
                &global.output,
                &results,
                |r| ResultRow::new(r, color),
                result_id,
            );
            output::print_output(&out, global.quiet);
            if results[0].is_failed() {
                return Err(CliError::SyncFailed {
                    failed: 1,
                    total: 1,
                });
            }
            Ok(())
        }
    }
}
