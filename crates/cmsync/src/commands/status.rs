//! Status and history handlers.

use std::fmt::Write as _;

use tabled::Tabled;

use cmsync_core::{ModelSyncStatus, SyncService, SyncStatus};

use crate::cli::{GlobalOpts, HistoryArgs};
use crate::output;

use super::sync::{ResultRow, result_id};

#[derive(Tabled)]
struct ModelStatusRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Dataset")]
    dataset: String,
    #[tabled(rename = "Last Sync")]
    last_sync: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Syncing")]
    syncing: String,
}

impl ModelStatusRow {
    fn new(model: &ModelSyncStatus, color: bool) -> Self {
        let (last_sync, status) = model.last_sync.as_ref().map_or_else(
            || ("never".to_owned(), String::new()),
            |r| {
                (
                    r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    output::state_label(r.status, color),
                )
            },
        );
        Self {
            model: model.model_id.clone(),
            dataset: model.dataset_name.clone(),
            last_sync,
            status,
            syncing: if model.is_syncing { "yes".into() } else { String::new() },
        }
    }
}

fn status_detail(status: &SyncStatus, color: bool) -> String {
    let mut out = String::new();
    let state = match (&status.current_model, status.is_running) {
        (Some(model), _) => format!("syncing {model}"),
        (None, true) => "syncing".to_owned(),
        (None, false) => "idle".to_owned(),
    };
    let _ = writeln!(out, "State:      {state}");
    let _ = writeln!(
        out,
        "Last run:   {}",
        status
            .last_run
            .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339())
    );
    let _ = writeln!(
        out,
        "Recorded:   {} total, {} successful, {} failed",
        status.total_syncs, status.successful_syncs, status.failed_syncs
    );
    let rows: Vec<ModelStatusRow> = status
        .models
        .iter()
        .map(|m| ModelStatusRow::new(m, color))
        .collect();
    out.push_str(&output::render_table(&rows));
    out
}

pub async fn handle(service: &SyncService, global: &GlobalOpts) {
    let status = service.status().await;
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &status,
        |s| status_detail(s, color),
        |s| if s.is_running { "running".into() } else { "idle".into() },
    );
    output::print_output(&out, global.quiet);
}

pub async fn history(service: &SyncService, args: &HistoryArgs, global: &GlobalOpts) {
    let results = service.history(args.limit).await;
    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &results,
        |r| ResultRow::new(r, color),
        result_id,
    );
    output::print_output(&out, global.quiet);
}
