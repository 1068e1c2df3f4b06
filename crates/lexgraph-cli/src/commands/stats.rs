use anyhow::Result;
use console::style;
use lexgraph_core::Core;

use crate::ui;

pub async fn run(core: &Core, json: bool) -> Result<()> {
    let stats = core.stats().await?;
    if json {
        return ui::json(&stats);
    }

    ui::header("LexGraph");
    for (label, value) in [
        ("Documents", stats.graph.documents),
        ("Units", stats.graph.units),
        ("Concepts", stats.graph.concepts),
        ("Relations", stats.graph.relations),
        ("Triples", stats.graph.triples),
        ("Embeddings", stats.embeddings),
    ] {
        println!("  {:<12} {}", label, style(value).cyan());
    }
    println!();
    ui::info(&format!("Data: {}", style(core.paths.base_dir.display()).dim()));
    Ok(())
}
