//! `hlsdl remove <task-id> [--delete-output]` – remove a task.

use anyhow::Result;
use hlsdl_core::registry::TaskRegistry;

pub async fn run_remove(registry: &TaskRegistry, task_id: i64, delete_output: bool) -> Result<()> {
    if delete_output {
        if let Some(row) = registry.get(task_id).await? {
            if let Err(e) = std::fs::remove_file(&row.output_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %row.output_path, error = %e, "could not delete output");
                }
            }
        }
    }
    registry.remove(task_id).await?;
    println!("Removed task {task_id}");
    Ok(())
}
