use std::{error::Error, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use dotenvy::dotenv;
use tasksync::{
    SessionCredentials, SqliteDocumentStore, SyncController, TaskDraft, TaskSyncBuilder,
    TaskSyncConfig, TokioNotifier,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "commands:
  add <title>              create a task
  remind <minutes> <title> create a task due in <minutes>
  list                     show your tasks
  done <n>                 toggle task n
  rm <n>                   delete task n (asks first)
  pending                  list scheduled reminders
  login <user> | logout
  quit";

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let config = TaskSyncConfig::from_env()?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let user = std::env::var("USER").unwrap_or_else(|_| "local-user".to_string());

    let documents = SqliteDocumentStore::connect(&database_url).await?;
    log::debug!("Connected to {database_url}");

    let notifier = TokioNotifier::new();
    let mut fired = notifier.fired_rx();
    tokio::spawn(async move {
        while let Ok(note) = fired.recv().await {
            println!("\nReminder: {} - {}", note.content.title, note.content.body);
        }
    });

    let session = SessionCredentials::signed_in(user);
    let controller = TaskSyncBuilder::new(Arc::new(documents), Arc::new(notifier), &session)
        .with_config(config)
        .build()?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "" | "quit" | "exit" => break,
            "add" => save(&controller, TaskDraft::from_form(rest, "", "", false)).await,
            "remind" => {
                let (minutes, title) = rest.split_once(' ').unwrap_or((rest, ""));
                match due_in(minutes, Utc::now()) {
                    Some(due) => {
                        let draft = TaskDraft::new(title.trim()).with_due_date(due);
                        save(&controller, Ok(draft)).await
                    }
                    None => println!("usage: remind <minutes> <title>"),
                }
            }
            "list" => print_tasks(&controller),
            "done" => {
                if let Some(task) = pick(&controller, rest) {
                    match controller.toggle_complete(&task).await {
                        Ok(confirmation) => println!("{}", confirmation.message()),
                        Err(e) => println!("error: {e}"),
                    }
                }
            }
            "rm" => {
                if let Some(task) = pick(&controller, rest) {
                    let pending = controller.request_delete(&task);
                    println!("Are you sure you want to delete \"{}\"? [y/N]", pending.title());
                    let answer = lines.next_line().await?.unwrap_or_default();
                    if answer.trim().eq_ignore_ascii_case("y") {
                        match pending.confirm().await {
                            Ok(confirmation) => println!("{}", confirmation.message()),
                            Err(e) => println!("error: {e}"),
                        }
                    } else {
                        pending.dismiss();
                    }
                }
            }
            "pending" => {
                for note in controller.scheduler().pending().await {
                    println!("{}  {}  {}", note.fire_at, note.id, note.content.title);
                }
            }
            "login" if !rest.is_empty() => session.sign_in(rest),
            "logout" => session.sign_out(),
            _ => println!("{HELP}"),
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn save(controller: &SyncController, draft: Result<TaskDraft, tasksync::TaskError>) {
    let draft = match draft {
        Ok(draft) => draft,
        Err(e) => {
            println!("error: {e}");
            return;
        }
    };
    match controller.save_task(&draft, None).await {
        Ok(outcome) => {
            println!("{}", outcome.confirmation.message());
            if let tasksync::ReminderOutcome::Failed(e) = outcome.reminder {
                println!("reminder not scheduled: {e}");
            }
        }
        Err(e) => println!("error: {e}"),
    }
}

/// `now` plus `minutes`, or `None` if the input is not a usable count.
fn due_in(minutes: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    minutes
        .parse::<i64>()
        .ok()
        .and_then(TimeDelta::try_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
}

fn print_tasks(controller: &SyncController) {
    let state = controller.state();
    if state.loading {
        println!("Loading...");
        return;
    }
    if state.tasks.is_empty() {
        println!("No tasks yet");
    }
    for (i, task) in state.tasks.iter().enumerate() {
        let mark = if task.completed { 'x' } else { ' ' };
        let due = task
            .due_date
            .map(|d| format!("  (due {})", d.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!("{:>2}. [{mark}] {}{due}", i + 1, task.title);
    }
}

fn pick(controller: &SyncController, arg: &str) -> Option<tasksync::Task> {
    let task = arg
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| controller.state().tasks.get(i).cloned());
    if task.is_none() {
        println!("no task {arg:?}; try `list`");
    }
    task
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_due_in_rejects_out_of_range_minutes() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        assert_eq!(
            due_in("90", now),
            Some(Utc.with_ymd_and_hms(2026, 4, 1, 13, 30, 0).unwrap())
        );
        assert_eq!(due_in("99999999999999", now), None);
        assert_eq!(due_in(&i64::MAX.to_string(), now), None);
        assert_eq!(due_in("soon", now), None);
    }
}
