//! `hlsdl add <url> <output>` – register a new download task.

use anyhow::Result;
use hlsdl_core::registry::TaskRegistry;
use hlsdl_core::task::Priority;

fn parse_priority(s: &str) -> Priority {
    match s {
        "low" => Priority::Low,
        "high" => Priority::High,
        _ => Priority::Normal,
    }
}

pub async fn run_add(registry: &TaskRegistry, url: &str, output: &str, priority: &str) -> Result<()> {
    let id = registry.add_task(url, output, parse_priority(priority)).await?;
    println!("Added task {id} for {url} -> {output}");
    Ok(())
}
