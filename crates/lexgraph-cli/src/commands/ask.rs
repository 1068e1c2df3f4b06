use anyhow::Result;
use console::style;
use lexgraph_core::Core;

use crate::commands::cancel_on_ctrl_c;
use crate::ui;

pub async fn run(core: &mut Core, question: &str, graph: bool, top_k: Option<usize>, json: bool) -> Result<()> {
    if let Some(k) = top_k {
        core.config.retrieval.top_k = k;
    }

    let spinner = ui::spinner("Thinking...");
    let result = core.ask(question, graph, &cancel_on_ctrl_c()).await;
    spinner.finish_and_clear();
    let response = result?;

    if json {
        return ui::json(&response);
    }

    match &response.answer {
        Some(answer) => {
            ui::header("Answer");
            for line in answer.lines() {
                ui::info(line);
            }
        }
        None if response.sources.is_empty() => ui::error("No relevant provisions found."),
        None => ui::error("No answer generated; showing sources only."),
    }

    if !response.sources.is_empty() {
        ui::header("Sources");
        for source in &response.sources {
            println!(
                "  {} {} {}",
                style(&source.document_title).cyan(),
                source.code.as_deref().unwrap_or(""),
                style(format!("({})", source.level)).dim(),
            );
            ui::info(&format!("   {}", source.snippet));
        }
        println!();
    }
    Ok(())
}
