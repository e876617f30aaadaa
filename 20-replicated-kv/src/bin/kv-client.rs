//! Client process. Waits for `initialize`, then runs a command script from
//! `--script` or stdin, printing one line per completed command.
//!
//! ```bash
//! echo "set x 1
//! get x" | cargo run --bin kv-client -- 9100
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::select;
use tracing::info;

use replicated_kv::cli::{init_tracing, ClientArgs};
use replicated_kv::node::NodeContext;
use replicated_kv::shell::run_client;
use replicated_kv::transport::TcpTransport;
use replicated_kv::Node;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    let addr = args.tuning.listen_addr(args.port);
    let node = Node::bind(&addr, args.tuning.settings())
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!("client listening on {}", node.local_addr()?);

    let context = node.context();
    let serve = node.run_until_ctrl_c();

    select! {
        served = serve => {
            served.context("client runtime exited with error")?;
            info!("client stopped before its script finished");
        }
        ran = run(context, args.script) => ran?,
    }

    Ok(())
}

async fn run(context: Arc<NodeContext<TcpTransport>>, script: Option<PathBuf>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    match script {
        Some(path) => {
            let file = File::open(&path)
                .await
                .with_context(|| format!("failed to open script {}", path.display()))?;
            run_client(context, BufReader::new(file), &mut stdout).await?;
        }
        None => run_client(context, BufReader::new(tokio::io::stdin()), &mut stdout).await?,
    }
    Ok(())
}
