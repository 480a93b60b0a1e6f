//! `hlsdl list [--status=...]` – list tasks, optionally filtered by status.

use anyhow::Result;
use hlsdl_core::registry::TaskRegistry;
use hlsdl_core::task::TaskStatus;

fn parse_status(s: &str) -> Option<TaskStatus> {
    match s {
        "pending" => Some(TaskStatus::Pending),
        "running" => Some(TaskStatus::Running),
        "paused" => Some(TaskStatus::Paused),
        "completed" => Some(TaskStatus::Completed),
        "failed" => Some(TaskStatus::Failed),
        "canceled" => Some(TaskStatus::Canceled),
        _ => None,
    }
}

pub async fn run_list(registry: &TaskRegistry, status: Option<&str>) -> Result<()> {
    let wanted = match status {
        Some(s) => match parse_status(s) {
            Some(status) => Some(status),
            None => {
                println!("Unknown status: {s}");
                return Ok(());
            }
        },
        None => None,
    };

    let tasks = registry.list().await?;
    let filtered: Vec<_> = tasks
        .iter()
        .filter(|t| match wanted {
            Some(w) => w == t.status,
            None => true,
        })
        .collect();

    if filtered.is_empty() {
        println!("No matching tasks.");
        return Ok(());
    }
    println!("{:<6} {:<10} {}", "ID", "STATUS", "OUTPUT");
    for row in filtered {
        println!(
            "{:<6} {:<10} {}",
            row.id,
            format!("{:?}", row.status).to_lowercase(),
            row.output_path
        );
    }
    Ok(())
}
