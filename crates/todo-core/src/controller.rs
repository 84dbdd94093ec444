//! Task lifecycle flows.
//!
//! Every flow runs the same three steps in order: mutate through the
//! repository, re-render the list, then notify. Failures are logged and turned
//! into an [`Outcome`]; nothing propagates past this layer.

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::notify::{NotificationBackend, Notifier, Permission};
use crate::render::{ListView, Renderer};
use crate::repository::TaskRepository;
use crate::task::{InputError, Task, TaskInput};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Added(Task),
    Deleted(Task),
    Finished(Task),
    NotFound(u64),
    Rejected(InputError),
    Failed { action: &'static str, message: String },
}

impl Outcome {
    /// True unless the request was rejected or failed; a missing task is not
    /// an error.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Rejected(_) | Self::Failed { .. })
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::Added(task) | Self::Deleted(task) | Self::Finished(task) => Some(task),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    #[default]
    All,
    Pending,
    Finished,
}

#[derive(Debug)]
pub struct TaskController<B> {
    repository: TaskRepository,
    renderer: Renderer,
    view: ListView,
    notifier: Notifier<B>,
}

impl<B: NotificationBackend> TaskController<B> {
    pub fn new(repository: TaskRepository, renderer: Renderer, notifier: Notifier<B>) -> Self {
        Self {
            repository,
            renderer,
            view: ListView::new(),
            notifier,
        }
    }

    pub fn view(&self) -> &ListView {
        &self.view
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn notifier(&self) -> &Notifier<B> {
        &self.notifier
    }

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub fn add_task(&mut self, input: TaskInput) -> Outcome {
        let task = match input.parse() {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, "rejected task input");
                return Outcome::Rejected(err);
            }
        };

        let task = match self.repository.add(task) {
            Ok(task) => task,
            Err(err) => return failed("add", &err),
        };
        info!(task_id = ?task.task_id, "task added successfully");

        self.display_tasks();
        self.notifier
            .show_notification("Task Added", &format!("Task \"{}\" has been added.", task.title));
        Outcome::Added(task)
    }

    #[instrument(skip(self))]
    pub fn delete_task(&mut self, task_id: u64) -> Outcome {
        let removed = match self.repository.delete(task_id) {
            Ok(removed) => removed,
            Err(err) => return failed("delete", &err),
        };

        self.display_tasks();
        match removed {
            Some(task) => {
                info!("task deleted successfully");
                self.notifier
                    .show_notification("Task Deleted", &format!("Task \"{}\" has been deleted.", task.title));
                Outcome::Deleted(task)
            }
            None => {
                warn!("no task with this id; nothing deleted");
                Outcome::NotFound(task_id)
            }
        }
    }

    #[instrument(skip(self))]
    pub fn finish_task(&mut self, task_id: u64) -> Outcome {
        let updated = match self.repository.finish(task_id, Utc::now()) {
            Ok(updated) => updated,
            Err(err) => return failed("finish", &err),
        };

        self.display_tasks();
        match updated {
            Some(task) => {
                info!("task marked as finished successfully");
                self.notifier
                    .show_notification("Task Finished", &format!("Task \"{}\" has been finished.", task.title));
                Outcome::Finished(task)
            }
            None => {
                warn!("no task with this id; nothing finished");
                Outcome::NotFound(task_id)
            }
        }
    }

    /// Rebuild the list from every stored task. If the tasks cannot be read
    /// the previous view is kept.
    pub fn display_tasks(&mut self) -> &ListView {
        if let Err(err) = self.renderer.display_tasks(&mut self.repository, &mut self.view) {
            let message = format!("{err:#}");
            error!(error = %message, "error retrieving tasks");
        }
        &self.view
    }

    /// Like [`Self::display_tasks`] but restricted by completion state.
    pub fn display_selection(&mut self, filter: ListFilter) -> anyhow::Result<&ListView> {
        let tasks = match filter {
            ListFilter::All => self.repository.all()?,
            ListFilter::Pending => self.repository.by_finished(false)?,
            ListFilter::Finished => self.repository.by_finished(true)?,
        };
        self.renderer.render_tasks(&tasks, &mut self.view);
        Ok(&self.view)
    }

    pub fn request_notification_permission(&mut self) -> Permission {
        self.notifier.request_notification_permission()
    }

    pub fn shutdown(&mut self) {
        self.repository.close();
    }
}

fn failed(action: &'static str, err: &anyhow::Error) -> Outcome {
    let message = format!("{err:#}");
    error!(action, error = %message, "task operation failed");
    Outcome::Failed { action, message }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::notify::{DEFAULT_ICON, RecordingBackend};
    use crate::repository::DATABASE_NAME;

    /// Counts the records on disk each time a notification is shown.
    struct DiskCountingBackend {
        path: std::path::PathBuf,
        counts: Vec<usize>,
    }

    impl NotificationBackend for DiskCountingBackend {
        fn request_permission(&mut self) -> Permission {
            Permission::Granted
        }

        fn show(&mut self, _notification: &crate::notify::Notification) -> anyhow::Result<()> {
            let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
            let count = doc["stores"]["tasks"]["records"]
                .as_object()
                .map_or(0, |records| records.len());
            self.counts.push(count);
            Ok(())
        }
    }

    fn controller(dir: &std::path::Path, permission: Permission) -> TaskController<RecordingBackend> {
        TaskController::new(
            TaskRepository::lazy(dir, DATABASE_NAME),
            Renderer::plain(),
            Notifier::new(RecordingBackend::new(permission), DEFAULT_ICON),
        )
    }

    #[test]
    fn add_renders_then_notifies() {
        let temp = tempdir().expect("tempdir");
        let mut ctl = controller(temp.path(), Permission::Granted);

        let outcome = ctl.add_task(TaskInput::new("Pay bills", "9", "5", "2024-03-01"));
        assert_eq!(outcome.task().and_then(|task| task.task_id), Some(1));
        assert_eq!(ctl.view().texts(), vec!["Pay bills - 3/1/2024 09:05"]);

        let shown = ctl.notifier().backend().shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Task Added");
        assert_eq!(shown[0].body, "Task \"Pay bills\" has been added.");
    }

    #[test]
    fn rejected_input_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        let mut ctl = controller(temp.path(), Permission::Granted);

        let outcome = ctl.add_task(TaskInput::new("", "9", "5", "2024-03-01"));
        assert_eq!(outcome, Outcome::Rejected(InputError::EmptyTitle));
        assert!(!outcome.is_success());
        assert!(ctl.notifier().backend().shown().is_empty());
        assert!(ctl.display_tasks().is_empty());
    }

    #[test]
    fn missing_task_is_not_notified() {
        let temp = tempdir().expect("tempdir");
        let mut ctl = controller(temp.path(), Permission::Granted);
        ctl.add_task(TaskInput::new("Keep", "1", "2", "2024-03-01"));

        assert_eq!(ctl.delete_task(99), Outcome::NotFound(99));
        assert_eq!(ctl.finish_task(99), Outcome::NotFound(99));
        assert!(Outcome::NotFound(99).is_success());
        assert_eq!(ctl.view().len(), 1);
        assert_eq!(ctl.notifier().backend().shown().len(), 1);
    }

    #[test]
    fn storage_failure_is_reported_not_raised() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("ToDoDB.json"), "not json").expect("corrupt file");
        let mut ctl = controller(temp.path(), Permission::Granted);

        let outcome = ctl.add_task(TaskInput::new("Pay bills", "9", "5", "2024-03-01"));
        assert!(matches!(outcome, Outcome::Failed { action: "add", .. }));
        assert!(ctl.display_tasks().is_empty());
        assert!(ctl.notifier().backend().shown().is_empty());
    }

    #[test]
    fn failed_refresh_keeps_previous_view() {
        let temp = tempdir().expect("tempdir");
        let mut ctl = controller(temp.path(), Permission::Granted);
        ctl.add_task(TaskInput::new("Keep", "8", "30", "2024-03-01"));
        ctl.shutdown();

        fs::write(temp.path().join("ToDoDB.json"), "garbage").expect("corrupt file");
        assert_eq!(ctl.display_tasks().texts(), vec!["Keep - 3/1/2024 08:30"]);
    }

    #[test]
    fn store_is_committed_before_notifying() {
        let temp = tempdir().expect("tempdir");
        let backend = DiskCountingBackend {
            path: temp.path().join("ToDoDB.json"),
            counts: Vec::new(),
        };
        let mut ctl = TaskController::new(
            TaskRepository::lazy(temp.path(), DATABASE_NAME),
            Renderer::plain(),
            Notifier::new(backend, DEFAULT_ICON),
        );

        ctl.add_task(TaskInput::new("One", "8", "0", "2024-03-01"));
        assert_eq!(ctl.view().len(), 1);
        ctl.add_task(TaskInput::new("Two", "9", "0", "2024-03-01"));
        assert_eq!(ctl.view().len(), 2);
        ctl.delete_task(1);
        assert_eq!(ctl.view().texts(), vec!["Two - 3/1/2024 09:00"]);

        assert_eq!(ctl.notifier().backend().counts, vec![1, 2, 1]);
    }

    #[test]
    fn denied_permission_still_mutates() {
        let temp = tempdir().expect("tempdir");
        let mut ctl = controller(temp.path(), Permission::Denied);

        ctl.add_task(TaskInput::new("Quiet", "8", "0", "2024-03-01"));
        assert!(matches!(ctl.finish_task(1), Outcome::Finished(_)));
        assert!(ctl.notifier().backend().shown().is_empty());
        assert_eq!(ctl.notifier().backend().permission_requests(), 2);
    }

    #[test]
    fn selection_filters_by_completion() {
        let temp = tempdir().expect("tempdir");
        let mut ctl = controller(temp.path(), Permission::Denied);
        ctl.add_task(TaskInput::new("One", "8", "0", "2024-03-01"));
        ctl.add_task(TaskInput::new("Two", "9", "0", "2024-03-01"));
        ctl.finish_task(1);

        let pending = ctl.display_selection(ListFilter::Pending).expect("pending");
        assert_eq!(pending.texts(), vec!["Two - 3/1/2024 09:00"]);
        let finished = ctl.display_selection(ListFilter::Finished).expect("finished");
        assert_eq!(finished.texts(), vec!["One - 3/1/2024 08:00"]);
    }
}
