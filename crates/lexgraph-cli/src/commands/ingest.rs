use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use lexgraph_core::{Core, IngestRequest};

use crate::commands::cancel_on_ctrl_c;
use crate::ui;

fn read_request(file: &Path) -> Result<IngestRequest> {
    let contents = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?
    };
    serde_json::from_str(&contents).with_context(|| format!("Invalid ingestion request in {}", file.display()))
}

pub async fn run(core: &Core, file: &Path, no_embed: bool, json: bool) -> Result<()> {
    let mut req = read_request(file)?;
    if no_embed {
        req.auto_embed = Some(false);
    }

    let spinner = ui::spinner(&format!("Ingesting {}...", req.document.title));
    let result = core.ingest(&req, &cancel_on_ctrl_c()).await;
    spinner.finish_and_clear();
    let response = result?;

    if json {
        return ui::json(&response);
    }

    if response.units_created == 0 && response.triples_created == 0 {
        ui::info(&response.processing_summary);
        return Ok(());
    }
    ui::success(&response.processing_summary);
    ui::info(&format!("Document id: {}", style(response.document_id).cyan()));
    Ok(())
}
