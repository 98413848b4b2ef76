//! Configured model listing.

use serde::Serialize;
use tabled::Tabled;

use cmsync_core::{ModelConfig, SyncConfig};

use crate::cli::GlobalOpts;
use crate::output;

#[derive(Serialize)]
struct ModelEntry<'a> {
    model_id: &'a str,
    #[serde(flatten)]
    config: &'a ModelConfig,
}

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "CMS Model")]
    cms_model: String,
    #[tabled(rename = "Dataset")]
    dataset: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Geometry")]
    geometry: String,
}

impl From<&ModelEntry<'_>> for ModelRow {
    fn from(entry: &ModelEntry<'_>) -> Self {
        Self {
            model: entry.model_id.to_owned(),
            cms_model: entry.config.cms_model_id.clone(),
            dataset: entry.config.dataset.name.clone(),
            title: entry.config.dataset.title.clone(),
            geometry: entry.config.geometry_field().unwrap_or_default().to_owned(),
        }
    }
}

pub fn handle(config: &SyncConfig, global: &GlobalOpts) {
    let entries: Vec<ModelEntry<'_>> = config
        .models
        .iter()
        .map(|(model_id, config)| ModelEntry { model_id, config })
        .collect();
    let out = output::render_list(
        &global.output,
        &entries,
        |e| ModelRow::from(e),
        |e| e.model_id.to_owned(),
    );
    output::print_output(&out, global.quiet);
}
