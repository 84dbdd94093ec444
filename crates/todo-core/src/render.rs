use std::io::{self, IsTerminal, Write};

use anyhow::Context;
use tracing::debug;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::repository::TaskRepository;
use crate::task::Task;

/// One rendered entry of the task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub task_id: Option<u64>,
    pub text: String,
    pub finished: bool,
}

impl TaskLine {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            text: format!("{} - {} {}", task.title, task.display_date(), task.clock()),
            finished: task.finished,
        }
    }
}

/// The list container. Every render clears it and rebuilds it from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListView {
    lines: Vec<TaskLine>,
}

impl ListView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn push(&mut self, line: TaskLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[TaskLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.text.as_str()).collect()
    }

    /// Markup form of the list: one `<div><p>` per task with a delete button
    /// bound to the task id.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let id = line.task_id.map(|id| id.to_string()).unwrap_or_default();
            out.push_str(&format!(
                "<div><p>{} <button class=\"btn btn-dark text-light\" data-action=\"delete\" data-task-id=\"{}\">Delete</button></p></div>\n",
                escape_html(&line.text),
                id
            ));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Read every task and rebuild `view`, in the store's order. On failure
    /// the view keeps its previous content.
    #[tracing::instrument(skip(self, repository, view))]
    pub fn display_tasks(&self, repository: &mut TaskRepository, view: &mut ListView) -> anyhow::Result<()> {
        let tasks = repository.all().context("failed to retrieve tasks")?;
        self.render_tasks(&tasks, view);
        Ok(())
    }

    pub fn render_tasks(&self, tasks: &[Task], view: &mut ListView) {
        view.clear();
        for task in tasks {
            view.push(TaskLine::from_task(task));
        }
        debug!(count = view.len(), "rendered task list");
    }

    #[tracing::instrument(skip(self, view, writer))]
    pub fn write_view<W: Write>(&self, view: &ListView, mut writer: W) -> anyhow::Result<()> {
        if view.is_empty() {
            writeln!(writer, "No tasks.")?;
            return Ok(());
        }

        let ids: Vec<String> = view
            .lines()
            .iter()
            .map(|line| line.task_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()))
            .collect();
        let width = ids
            .iter()
            .map(|id| UnicodeWidthStr::width(id.as_str()))
            .max()
            .unwrap_or(0);

        for (line, id) in view.lines().iter().zip(ids) {
            let padded = format!("{id:>width$}");
            let mark = if line.finished { self.paint("✓", "32") } else { " ".to_string() };
            writeln!(
                writer,
                "{} {} {}  [delete {}]",
                self.paint(&padded, "33"),
                mark,
                line.text,
                id
            )?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
