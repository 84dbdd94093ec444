use std::io::Write;

use tracing::{debug, info, instrument};

use crate::cli::Command;
use crate::controller::{ListFilter, Outcome, TaskController};
use crate::notify::{NotificationBackend, Permission};
use crate::task::TaskInput;

/// Run one command against the controller and report on `out`. Returns the
/// process exit code.
#[instrument(skip(controller, command, out))]
pub fn dispatch<B: NotificationBackend, W: Write>(
    controller: &mut TaskController<B>,
    command: Command,
    out: &mut W,
) -> anyhow::Result<i32> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            title,
            hours,
            minutes,
            date,
        } => {
            info!("command add");
            let input = TaskInput::new(title.join(" "), hours, minutes, date);
            let outcome = controller.add_task(input);
            report(controller, outcome, out)
        }
        Command::Delete { id } => {
            info!("command delete");
            let outcome = controller.delete_task(id);
            report(controller, outcome, out)
        }
        Command::Finish { id } => {
            info!("command finish");
            let outcome = controller.finish_task(id);
            report(controller, outcome, out)
        }
        Command::List {
            html,
            pending,
            finished,
        } => cmd_list(controller, list_filter(pending, finished), html, out),
        Command::Permission => cmd_permission(controller, out),
    }
}

fn list_filter(pending: bool, finished: bool) -> ListFilter {
    match (pending, finished) {
        (true, _) => ListFilter::Pending,
        (_, true) => ListFilter::Finished,
        _ => ListFilter::All,
    }
}

#[instrument(skip(controller, out))]
fn cmd_list<B: NotificationBackend, W: Write>(
    controller: &mut TaskController<B>,
    filter: ListFilter,
    html: bool,
    out: &mut W,
) -> anyhow::Result<i32> {
    info!("command list");

    let view = controller.display_selection(filter)?.clone();
    if html {
        write!(out, "{}", view.to_html())?;
    } else {
        controller.renderer().write_view(&view, &mut *out)?;
    }
    Ok(0)
}

fn cmd_permission<B: NotificationBackend, W: Write>(
    controller: &mut TaskController<B>,
    out: &mut W,
) -> anyhow::Result<i32> {
    info!("command permission");

    let permission = controller.request_notification_permission();
    match permission {
        Permission::Granted => writeln!(out, "Notifications are allowed.")?,
        Permission::Denied => writeln!(out, "Notifications are blocked.")?,
        Permission::Unsupported => writeln!(out, "Notifications are not supported here.")?,
    }
    Ok(0)
}

/// Print the refreshed list and a one-line summary of what happened.
fn report<B: NotificationBackend, W: Write>(
    controller: &TaskController<B>,
    outcome: Outcome,
    out: &mut W,
) -> anyhow::Result<i32> {
    match outcome {
        Outcome::Rejected(err) => {
            eprintln!("error: {err}");
            return Ok(1);
        }
        Outcome::Failed { action, message } => {
            eprintln!("error: failed to {action} task: {message}");
            return Ok(1);
        }
        _ => {}
    }

    controller.renderer().write_view(controller.view(), &mut *out)?;
    match &outcome {
        Outcome::Added(task) => writeln!(out, "Added task {}.", task_id_label(task.task_id))?,
        Outcome::Deleted(task) => writeln!(out, "Deleted task {}.", task_id_label(task.task_id))?,
        Outcome::Finished(task) => writeln!(out, "Finished task {}.", task_id_label(task.task_id))?,
        Outcome::NotFound(id) => writeln!(out, "No task with id {id}.")?,
        Outcome::Rejected(_) | Outcome::Failed { .. } => {}
    }
    Ok(0)
}

fn task_id_label(task_id: Option<u64>) -> String {
    task_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string())
}
