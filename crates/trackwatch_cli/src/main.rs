//! Command-line driver for the notification core.
//!
//! # Responsibility
//! - Exercise `NotificationService` against a real data directory.
//! - Keep output line-oriented and deterministic for scripting.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use trackwatch_core::{
    init_logging, parse_notification_kind, CreateOutcome, LogPresenter, LogSettings,
    Notification, NotificationService, NotifyConfig, StorageBackend,
};

const USAGE: &str = "usage: trackwatch <data_dir> [--sqlite] <command>
commands:
  status
  list
  unread
  add <kind> <task_id|-> <message...>
  read <id>
  read-all
  clear";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let (data_dir, rest) = args.split_first().ok_or(USAGE)?;
    let (backend, rest) = match rest.split_first() {
        Some((flag, tail)) if flag == "--sqlite" => (StorageBackend::Sqlite, tail),
        _ => (StorageBackend::JsonFiles, rest),
    };
    let (command, command_args) = rest.split_first().ok_or(USAGE)?;

    let data_dir = PathBuf::from(data_dir);
    start_logging(&data_dir);

    let config = NotifyConfig::new(&data_dir).with_backend(backend);
    let service = NotificationService::open(config, Arc::new(LogPresenter))
        .map_err(|err| err.to_string())?;

    match (command.as_str(), command_args) {
        ("status", []) => {
            println!("version={}", trackwatch_core::core_version());
            println!("history={}", service.get_all().len());
            println!("unread={}", service.get_unread_count());
            println!("notified={}", service.notified_count());
        }
        ("list", []) => service.get_all().iter().for_each(print_notification),
        ("unread", []) => service.get_unread().iter().for_each(print_notification),
        ("add", [kind, task_id, message @ ..]) if !message.is_empty() => {
            let kind = parse_notification_kind(kind).map_err(|err| err.to_string())?;
            let task_id = match task_id.as_str() {
                "-" => None,
                value => Some(
                    value
                        .parse::<u64>()
                        .map_err(|err| format!("invalid task id `{value}`: {err}"))?,
                ),
            };
            match service.create_notification(kind, message.join(" "), task_id) {
                CreateOutcome::Created(notification) => print_notification(&notification),
                CreateOutcome::Deduplicated { task_id } => {
                    println!("deduplicated task_id={task_id}")
                }
            }
        }
        ("read", [id]) => {
            let id = id
                .parse::<u64>()
                .map_err(|err| format!("invalid notification id `{id}`: {err}"))?;
            println!("changed={}", service.mark_as_read(id));
        }
        ("read-all", []) => println!("changed={}", service.mark_all_as_read()),
        ("clear", []) => service.clear_all(),
        _ => return Err(USAGE.to_string()),
    }

    service.close();
    Ok(())
}

/// Logging goes to `<data_dir>/logs`; failure to start it is not fatal.
fn start_logging(data_dir: &std::path::Path) {
    let log_dir = match std::path::absolute(data_dir) {
        Ok(dir) => dir.join("logs"),
        Err(err) => {
            eprintln!("logging disabled: {err}");
            return;
        }
    };
    let settings = LogSettings::new(trackwatch_core::default_log_level(), log_dir);
    if let Err(err) = init_logging(&settings) {
        eprintln!("logging disabled: {err}");
    }
}

fn print_notification(notification: &Notification) {
    let task = notification
        .task_id()
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    println!(
        "{}\t{}\t{}\t{}\t{}",
        notification.id(),
        notification.kind(),
        if notification.is_read() { "read" } else { "unread" },
        task,
        notification.message()
    );
}
