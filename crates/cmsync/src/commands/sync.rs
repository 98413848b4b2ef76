//! Sync command handler.

use tabled::Tabled;

use cmsync_core::{SyncJob, SyncOptions, SyncResult, SyncService};

use crate::cli::{GlobalOpts, SyncArgs};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct ResultRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Records")]
    records: usize,
    #[tabled(rename = "Uploaded")]
    uploaded: usize,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

impl ResultRow {
    pub fn new(result: &SyncResult, color: bool) -> Self {
        let notes = result
            .errors
            .first()
            .or_else(|| result.warnings.first())
            .cloned()
            .unwrap_or_default();
        Self {
            model: result.model_id.clone(),
            status: output::state_label(result.status, color),
            started: result.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            records: result.records_fetched,
            uploaded: result.resources_uploaded,
            duration: result
                .duration()
                .map(|d| {
                    let ms = d.num_milliseconds();
                    format!("{}.{}s", ms / 1000, (ms % 1000) / 100)
                })
                .unwrap_or_default(),
            notes,
        }
    }
}

pub fn result_id(result: &SyncResult) -> String {
    format!("{}\t{}", result.model_id, result.status)
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    service: &SyncService,
    args: SyncArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let model_ids = (!args.models.is_empty()).then_some(args.models);
    let options = SyncOptions {
        dry_run: args.dry_run,
        force: args.force,
        update_resource_id: args.resource_id,
    };

    let results = service
        .run(SyncJob::select(model_ids, options, args.smart))
        .await?;

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &results,
        |r| ResultRow::new(r, color),
        result_id,
    );
    output::print_output(&out, global.quiet);

    let failed = results.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        return Err(CliError::SyncFailed {
            failed,
            total: results.len(),
        });
    }
    Ok(())
}
