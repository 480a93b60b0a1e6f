//! `hlsdl pause|resume|cancel <task-id>` – flip a registry row's status.
//!
//! Each CLI invocation is a separate process with no running scheduler to
//! signal, so these commands just rewrite the row's status; the next
//! `run-all`'s `list_pending()` query naturally honors it (§4.— admission).

use anyhow::Result;
use hlsdl_core::registry::TaskRegistry;
use hlsdl_core::task::TaskStatus;

pub async fn run_pause(registry: &TaskRegistry, task_id: i64) -> Result<()> {
    registry.set_status(task_id, TaskStatus::Paused).await?;
    println!("Paused task {task_id}");
    Ok(())
}

pub async fn run_resume(registry: &TaskRegistry, task_id: i64) -> Result<()> {
    registry.set_status(task_id, TaskStatus::Pending).await?;
    println!("Resumed task {task_id}");
    Ok(())
}

pub async fn run_cancel(registry: &TaskRegistry, task_id: i64) -> Result<()> {
    registry.set_status(task_id, TaskStatus::Canceled).await?;
    println!("Canceled task {task_id}");
    Ok(())
}
