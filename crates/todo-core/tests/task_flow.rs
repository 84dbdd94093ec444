use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tempfile::tempdir;
use todo_core::controller::{Outcome, TaskController};
use todo_core::notify::{DEFAULT_ICON, Notifier, Permission, RecordingBackend};
use todo_core::render::Renderer;
use todo_core::repository::{DATABASE_NAME, TaskRepository};
use todo_core::task::TaskInput;

fn controller(dir: &Path) -> TaskController<RecordingBackend> {
    TaskController::new(
        TaskRepository::lazy(dir, DATABASE_NAME),
        Renderer::plain(),
        Notifier::new(RecordingBackend::new(Permission::Granted), DEFAULT_ICON),
    )
}

fn stored_records(dir: &Path) -> Value {
    let text = fs::read_to_string(dir.join("ToDoDB.json")).expect("read database file");
    let doc: Value = serde_json::from_str(&text).expect("parse database file");
    doc["stores"]["tasks"]["records"].clone()
}

#[test]
fn added_task_is_persisted_and_listed() {
    let temp = tempdir().expect("tempdir");
    let mut ctl = controller(temp.path());

    let outcome = ctl.add_task(TaskInput::new("Pay bills", "9", "5", "2024-03-01"));
    assert!(matches!(outcome, Outcome::Added(_)));
    assert_eq!(ctl.view().texts(), vec!["Pay bills - 3/1/2024 09:05"]);

    assert_eq!(
        stored_records(temp.path())["1"],
        json!({
            "taskId": 1,
            "title": "Pay bills",
            "date": "2024-03-01",
            "hours": 9,
            "minutes": 5
        })
    );
}

#[test]
fn ids_are_never_reused_after_reopen() {
    let temp = tempdir().expect("tempdir");
    let mut ctl = controller(temp.path());
    ctl.add_task(TaskInput::new("One", "1", "0", "2024-03-01"));
    ctl.add_task(TaskInput::new("Two", "2", "0", "2024-03-01"));

    assert!(matches!(ctl.delete_task(2), Outcome::Deleted(_)));
    assert_eq!(ctl.view().texts(), vec!["One - 3/1/2024 01:00"]);
    ctl.shutdown();

    let mut ctl = controller(temp.path());
    let outcome = ctl.add_task(TaskInput::new("Three", "3", "0", "2024-03-01"));
    assert_eq!(outcome.task().and_then(|task| task.task_id), Some(3));
    assert_eq!(ctl.view().len(), 2);
}

#[test]
fn finishing_twice_restamps_the_time() {
    let temp = tempdir().expect("tempdir");
    let mut ctl = controller(temp.path());
    ctl.add_task(TaskInput::new("Walk", "23", "59", "2024-12-31"));

    let first = match ctl.finish_task(1) {
        Outcome::Finished(task) => task,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let second = match ctl.finish_task(1) {
        Outcome::Finished(task) => task,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(first.finished && second.finished);
    assert!(second.finished_time >= first.finished_time);
    assert_eq!(ctl.view().texts(), vec!["Walk - 12/31/2024 23:59"]);

    let record = &stored_records(temp.path())["1"];
    assert_eq!(record["finished"], json!(true));
    assert!(record["finishedTime"].is_string());
}

#[test]
fn deleting_missing_id_changes_nothing() {
    let temp = tempdir().expect("tempdir");
    let mut ctl = controller(temp.path());
    ctl.add_task(TaskInput::new("Keep", "8", "30", "2024-03-01"));
    let before = stored_records(temp.path());

    assert_eq!(ctl.delete_task(42), Outcome::NotFound(42));
    assert_eq!(stored_records(temp.path()), before);
    assert_eq!(ctl.view().texts(), vec!["Keep - 3/1/2024 08:30"]);

    let titles: Vec<String> = ctl
        .notifier()
        .backend()
        .shown()
        .iter()
        .map(|n| n.title.clone())
        .collect();
    assert_eq!(titles, vec!["Task Added"]);
}
