use anyhow::Result;
use console::style;
use lexgraph_core::{Core, UnitTree};

use crate::ui;

fn print_tree(nodes: &[UnitTree], depth: usize) {
    for node in nodes {
        let indent = "  ".repeat(depth + 1);
        let label = node.unit.code.as_deref().unwrap_or(&node.unit.level);
        let preview: String = node.unit.text.chars().take(80).collect();
        println!("{}{} {}", indent, style(label).cyan(), style(preview).dim());
        print_tree(&node.children, depth + 1);
    }
}

pub async fn run(core: &Core, id: i64, json: bool) -> Result<()> {
    let Some(view) = core.document(id).await? else {
        ui::error(&format!("Document {id} not found."));
        return Ok(());
    };

    if json {
        return ui::json(&view);
    }

    let doc = &view.document;
    ui::header(&doc.title);
    ui::info(&format!(
        "{} {} {}",
        doc.doc_type,
        doc.number.as_deref().unwrap_or(""),
        doc.year.map(|y| y.to_string()).unwrap_or_default()
    ));
    if let Some(authority) = &doc.authority {
        ui::info(authority);
    }
    println!();
    print_tree(&view.units, 0);
    Ok(())
}
