//! Storage node. Starts uninitialized and learns its role (primary or
//! replica), consistency level and peers from the first `initialize` message.
//!
//! ```bash
//! cargo run --bin kv-node -- 9001 --quorum-timeout-ms 5000
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use replicated_kv::cli::{init_tracing, NodeArgs};
use replicated_kv::Node;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = NodeArgs::parse();
    let addr = args.tuning.listen_addr(args.port);
    let node = Node::bind(&addr, args.tuning.settings())
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!("node listening on {}", node.local_addr()?);

    node.run_until_ctrl_c()
        .await
        .context("node exited with error")?;

    Ok(())
}
