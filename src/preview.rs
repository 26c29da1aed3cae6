use anyhow::{Context, Result};
use log::info;

use crate::{cli::PreviewArgs, storage, table};

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let config = crate::resolve_config(args.config.as_deref(), args.storage.as_deref())?;
    let dataset = if args.clean {
        storage::load_clean(&config, &args.source_id)
    } else {
        storage::load_preview(&config, &args.source_id)
    }
    .with_context(|| format!("Loading stored rows for source '{}'", args.source_id))?;

    let shown = dataset.head(args.rows);
    table::print_dataset(&shown);
    info!(
        "Displayed {} of {} row(s) for source '{}'",
        shown.row_count(),
        dataset.row_count(),
        args.source_id
    );
    Ok(())
}
