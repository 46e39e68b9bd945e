use std::io::{self, BufRead, Write};

use jobflow_infra::EngineConfig;
use jobflow_node::{Node, NodeOptions};

fn main() -> anyhow::Result<()> {
    jobflow_observability::init();

    let config = EngineConfig::from_env();
    let options = NodeOptions::from_env();
    tracing::info!(partition = %config.partition_name, max_record_size = config.max_record_size, "starting node");

    let node = Node::start(&config, options)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        for output in node.handle_line(&line) {
            writeln!(stdout, "{}", serde_json::to_string(&output)?)?;
        }
        stdout.flush()?;
    }

    node.shutdown();
    tracing::info!("node stopped");
    Ok(())
}
