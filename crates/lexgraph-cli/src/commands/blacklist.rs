use anyhow::Result;
use lexgraph_core::Core;

use crate::ui;

pub async fn run(core: &Core, triple_id: i64, undo: bool) -> Result<()> {
    if !core.blacklist(triple_id, !undo).await? {
        ui::error(&format!("Triple {triple_id} not found."));
        return Ok(());
    }
    if undo {
        ui::success(&format!("Triple {triple_id} restored."));
    } else {
        ui::success(&format!("Triple {triple_id} blacklisted; it will no longer appear in answers."));
    }
    Ok(())
}
