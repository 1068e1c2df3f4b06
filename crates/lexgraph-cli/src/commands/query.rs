use anyhow::Result;
use console::style;
use lexgraph_core::Core;

use crate::commands::cancel_on_ctrl_c;
use crate::ui;

pub async fn run(core: &Core, text: &str, debug: bool, json: bool) -> Result<()> {
    let response = core.query(text, debug || json, &cancel_on_ctrl_c()).await?;

    if json {
        return ui::json(&response);
    }

    if response.answers.is_empty() {
        ui::error("No answers found.");
    } else {
        ui::header(&format!("{} answer(s)", response.answers.len()));
        for (i, answer) in response.answers.iter().enumerate() {
            println!(
                "  {}. {}  {}  {}",
                i + 1,
                style(&answer.doc_ref).cyan(),
                style(format!("{:.3}", answer.score)).dim(),
                style(format!("triple #{}", answer.triple_id)).dim(),
            );
            ui::info(&format!("   {}", answer.snippet));
            println!();
        }
    }

    if let Some(trace) = response.debug.filter(|_| debug) {
        let t = &trace.timings;
        ui::header("Debug");
        ui::info(&format!("Queries: {}", trace.rewritten_queries.join(" | ")));
        ui::info(&format!("Terms: {}", trace.terms.join(", ")));
        ui::info(&format!("Candidates: {}  Stars: {}", trace.candidates.len(), trace.stars.len()));
        ui::info(&format!(
            "Timings (ms): rewrite {} · terms {} · candidates {} · stars {} · triples {} · ranking {} · rerank {} · total {}",
            t.rewrite,
            t.term_extraction,
            t.candidate_search,
            t.star_building,
            t.triple_matching,
            t.initial_ranking,
            t.reranking.map(|ms| ms.to_string()).unwrap_or_else(|| "-".to_string()),
            t.total,
        ));
    }
    Ok(())
}
