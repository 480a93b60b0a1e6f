//! `hlsdl status [task-id]` – show one task's status, or every task.

use anyhow::Result;
use hlsdl_core::registry::{TaskRegistry, TaskRow};

fn print_row(row: &TaskRow) {
    println!(
        "{:<6} {:<10} {:<8} {}",
        row.id,
        format!("{:?}", row.status).to_lowercase(),
        format!("{:?}", row.priority).to_lowercase(),
        row.source_playlist_url
    );
}

pub async fn run_status(registry: &TaskRegistry, task_id: Option<i64>) -> Result<()> {
    match task_id {
        Some(id) => match registry.get(id).await? {
            Some(row) => print_row(&row),
            None => println!("No such task: {id}"),
        },
        None => {
            let tasks = registry.list().await?;
            if tasks.is_empty() {
                println!("No tasks in registry.");
            } else {
                println!("{:<6} {:<10} {:<8} {}", "ID", "STATUS", "PRIORITY", "URL");
                for row in &tasks {
                    print_row(row);
                }
            }
        }
    }
    Ok(())
}
