use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::commands::{build_runtime, load_config, CommandFailure, CommandResult};
use signoff_db::{connect_with_settings, migrations, CatalogSummary, WorkflowCatalog};

/// Loads a workflow catalog into the configured database. Without a file the
/// built-in demo catalog is used.
pub fn run(file: Option<&Path>) -> CommandResult {
    let catalog = match read_catalog(file) {
        Ok(catalog) => catalog,
        Err(failure) => return CommandResult::from(("seed", failure)),
    };
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let summary = catalog
            .load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<CatalogSummary, CommandFailure>(summary)
    });

    match result {
        Ok(summary) => {
            let source = file
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "built-in demo catalog".to_string());
            CommandResult::success_with_data("seed", format!("loaded {source}"), &summary)
        }
        Err(failure) => CommandResult::from(("seed", failure)),
    }
}

fn read_catalog(file: Option<&Path>) -> Result<WorkflowCatalog, CommandFailure> {
    let Some(path) = file else {
        return WorkflowCatalog::demo().map_err(|error| ("catalog_invalid", error.to_string(), 2));
    };

    let source = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))
        .map_err(|error| ("catalog_read", format!("{error:#}"), 2))?;
    WorkflowCatalog::parse(&source)
        .with_context(|| format!("invalid catalog `{}`", path.display()))
        .map_err(|error| ("catalog_invalid", format!("{error:#}"), 2))
}
