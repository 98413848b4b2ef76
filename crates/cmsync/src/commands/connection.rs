//! Connectivity check against both ends.

use cmsync_core::{ConnectionReport, SyncService};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

fn report_detail(report: &ConnectionReport, color: bool) -> String {
    format!(
        "CMS:      {}\nCatalog:  {}",
        output::check_label(report.source, color),
        output::check_label(report.catalog, color)
    )
}

pub async fn handle(service: &SyncService, global: &GlobalOpts) -> Result<(), CliError> {
    let report = service.test_connections().await;
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| report_detail(r, color),
        |r| if r.all_ok() { "ok".into() } else { "failed".into() },
    );
    output::print_output(&out, global.quiet);

    let failed: Vec<&str> = [("CMS", report.source), ("catalog", report.catalog)]
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::ConnectionCheck {
            failed: failed.join(", "),
        })
    }
}
