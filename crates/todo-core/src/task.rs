use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::{display_date, format_clock, parse_calendar_date, parse_clock_component};

/// A to-do item as stored in the `tasks` object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Assigned by the store on insert, `None` until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,

    pub title: String,

    /// Calendar date as entered (`YYYY-MM-DD`).
    pub date: String,

    pub hours: u8,

    pub minutes: u8,

    #[serde(default, skip_serializing_if = "is_false")]
    pub finished: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<DateTime<Utc>>,

    /// Fields written by other clients; kept so a rewrite does not drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Task {
    pub fn new(title: String, date: String, hours: u8, minutes: u8) -> Self {
        Self {
            task_id: None,
            title,
            date,
            hours,
            minutes,
            finished: false,
            finished_time: None,
            extra: BTreeMap::new(),
        }
    }

    /// Finished is one-way; calling this again only re-stamps the time.
    pub fn mark_finished(&mut self, now: DateTime<Utc>) {
        self.finished = true;
        self.finished_time = Some(now);
    }

    pub fn clock(&self) -> String {
        format_clock(self.hours, self.minutes)
    }

    pub fn display_date(&self) -> String {
        display_date(&self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("hours must be a number between 0 and 23, got {0:?}")]
    InvalidHours(String),

    #[error("minutes must be a number between 0 and 59, got {0:?}")]
    InvalidMinutes(String),

    #[error("date must be a calendar date (YYYY-MM-DD), got {0:?}")]
    InvalidDate(String),
}

/// Raw values from the add form, before any parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInput {
    pub title: String,
    pub hours: String,
    pub minutes: String,
    pub date: String,
}

impl TaskInput {
    pub fn new(
        title: impl Into<String>,
        hours: impl Into<String>,
        minutes: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            hours: hours.into(),
            minutes: minutes.into(),
            date: date.into(),
        }
    }

    pub fn parse(&self) -> Result<Task, InputError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(InputError::EmptyTitle);
        }

        let hours = parse_clock_component(&self.hours, 23)
            .ok_or_else(|| InputError::InvalidHours(self.hours.clone()))?;
        let minutes = parse_clock_component(&self.minutes, 59)
            .ok_or_else(|| InputError::InvalidMinutes(self.minutes.clone()))?;

        let date = self.date.trim();
        if parse_calendar_date(date).is_err() {
            return Err(InputError::InvalidDate(self.date.clone()));
        }

        Ok(Task::new(title.to_string(), date.to_string(), hours, minutes))
    }
}
