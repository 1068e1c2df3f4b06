pub mod ask;
pub mod blacklist;
pub mod doc;
pub mod ingest;
pub mod query;
pub mod stats;

use std::path::PathBuf;

use anyhow::Result;
use lexgraph_core::{Core, LexgraphPaths};
use tokio_util::sync::CancellationToken;

/// Open the core for the given data directory (or the default one).
pub async fn open_core(data_dir: Option<PathBuf>) -> Result<Core> {
    let paths = match data_dir {
        Some(dir) => LexgraphPaths::from_base(dir),
        None => LexgraphPaths::from_env(),
    };
    Core::init(&paths).await
}

/// A token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
