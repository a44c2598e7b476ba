use cipherdo_core::tasks::{NewTask, Task, TaskRepository};
use color_eyre::Result;
use uuid::Uuid;

use crate::{cli::TaskCommand, config, storage};

/// Execute a task subcommand using the encrypted store.
pub async fn handle(cmd: TaskCommand, config: &config::Config) -> Result<()> {
    let repo = storage::open_repo(config)?;
    run(cmd, &repo).await
}

async fn run<R: TaskRepository>(cmd: TaskCommand, repo: &R) -> Result<()> {
    match cmd {
        TaskCommand::List => {
            let tasks = repo
                .list()
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            if tasks.is_empty() {
                println!("No tasks yet. Add one with `cipherdo task add <title>`.");
                return Ok(());
            }
            for task in tasks {
                println!("{}", render(&task));
                if let Some(notes) = task.notes {
                    println!("    {notes}");
                }
            }
        }
        TaskCommand::Add {
            title,
            notes,
            priority,
            estimate,
        } => {
            let task = repo
                .create(NewTask {
                    title,
                    notes,
                    priority,
                    estimate_hours: estimate,
                })
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Created task {}: {}", task.id, task.title);
        }
        TaskCommand::Done { id } => {
            let task = repo
                .set_done(parse_id(&id)?, true)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Marked done: {}", task.title);
        }
        TaskCommand::Reopen { id } => {
            let task = repo
                .set_done(parse_id(&id)?, false)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Reopened: {}", task.title);
        }
        TaskCommand::Rm { id } => {
            let removed = repo
                .delete(parse_id(&id)?)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            if removed {
                println!("Deleted task {id}");
            } else {
                println!("No task with id {id}");
            }
        }
    }

    Ok(())
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|e| color_eyre::eyre::eyre!("invalid task id {id}: {e}"))
}

fn render(task: &Task) -> String {
    let status = if task.done { "done" } else { "todo" };
    let mut line = format!("{} [{status}] {}", task.id, task.title);
    if task.priority != 0 {
        line.push_str(&format!(" (p{})", task.priority));
    }
    if task.estimate_hours > 0.0 {
        line.push_str(&format!(" ~{}h", task.estimate_hours));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn add_then_done_through_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = storage::test_repo(dir.path());
        run(
            TaskCommand::Add {
                title: "buy milk".into(),
                notes: None,
                priority: 1,
                estimate: 0.5,
            },
            &repo,
        )
        .await
        .expect("add");

        let task = repo.list().await.expect("list").remove(0);
        run(TaskCommand::Done { id: task.id.to_string() }, &repo)
            .await
            .expect("done");
        assert!(repo.list().await.expect("list")[0].done);

        run(TaskCommand::Rm { id: task.id.to_string() }, &repo)
            .await
            .expect("rm");
        assert!(repo.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = storage::test_repo(dir.path());
        assert!(run(TaskCommand::Done { id: "nope".into() }, &repo).await.is_err());
    }

    #[test]
    fn renders_status_priority_and_estimate() {
        let mut task = Task::new(NewTask {
            priority: 2,
            estimate_hours: 1.5,
            ..NewTask::titled("buy milk")
        });
        assert!(render(&task).ends_with("[todo] buy milk (p2) ~1.5h"));
        task.done = true;
        task.priority = 0;
        task.estimate_hours = 0.0;
        assert!(render(&task).ends_with("[done] buy milk"));
    }
}
