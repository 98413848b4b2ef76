//! Command dispatch: bridges CLI args -> sync service -> output formatting.

pub mod connection;
pub mod jobs;
pub mod models;
pub mod serve;
pub mod status;
pub mod sync;

use clap::CommandFactory;
use clap_complete::{Shell, generate};

use cmsync_config::Config;
use cmsync_core::{JobStore, SyncConfig, SyncEngine, SyncService};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

/// Validate the config, start the sync worker and run one command.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let sync_config = config.to_sync_config()?;
    let service = start_service(sync_config).await?;

    let result = match cmd {
        Command::Sync(args) => sync::handle(&service, args, global).await,
        Command::Status => {
            status::handle(&service, global).await;
            Ok(())
        }
        Command::History(args) => {
            status::history(&service, &args, global).await;
            Ok(())
        }
        Command::Models => {
            models::handle(service.config(), global);
            Ok(())
        }
        Command::Test => connection::handle(&service, global).await,
        Command::Jobs(args) => jobs::handle(&service, args, global).await,
        Command::Serve(args) => serve::handle(&service, args, config).await,
        Command::Completions(args) => {
            completions(args.shell);
            Ok(())
        }
    };

    // lets a sync started by the server finish before exit
    service.shutdown().await;
    result
}

/// Print shell completions to stdout. Needs no configuration.
pub fn completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "cmsync", &mut std::io::stdout());
}

async fn start_service(config: SyncConfig) -> Result<SyncService, CliError> {
    let jobs = JobStore::open(config.jobs_path()).await;
    let engine = SyncEngine::new(config).await?;
    Ok(SyncService::start(engine, jobs))
}
