use std::io::{self, Write};

use anyhow::{Context, anyhow};
use tracing::{debug, info, warn};

use crate::config::Config;

pub const DEFAULT_ICON: &str = "icons/todo.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    Unsupported,
}

impl Permission {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "granted" | "on" | "yes" | "true" | "1" => Ok(Self::Granted),
            "denied" | "off" | "no" | "false" | "0" => Ok(Self::Denied),
            "unsupported" | "none" => Ok(Self::Unsupported),
            other => Err(anyhow!("invalid notifications setting: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
}

/// Platform side of notifications: permission prompts and delivery.
pub trait NotificationBackend {
    fn request_permission(&mut self) -> Permission;

    fn show(&mut self, notification: &Notification) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct Notifier<B> {
    backend: B,
    icon: String,
}

impl<B: NotificationBackend> Notifier<B> {
    pub fn new(backend: B, icon: impl Into<String>) -> Self {
        Self {
            backend,
            icon: icon.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Asks for permission every time and shows the notification only when it
    /// is granted. Returns whether something was shown; a denial or a delivery
    /// failure is never an error.
    pub fn show_notification(&mut self, title: &str, body: &str) -> bool {
        let permission = self.backend.request_permission();
        debug!(permission = permission.as_str(), "notification permission");
        if permission != Permission::Granted {
            debug!(title, "notification skipped");
            return false;
        }

        let notification = Notification {
            title: title.to_string(),
            body: body.to_string(),
            icon: self.icon.clone(),
        };
        match self.backend.show(&notification) {
            Ok(()) => true,
            Err(err) => {
                warn!(title, error = %err, "failed to show notification");
                false
            }
        }
    }

    /// User-triggered permission prompt; confirms with a notification when
    /// granted.
    pub fn request_notification_permission(&mut self) -> Permission {
        let permission = self.backend.request_permission();
        info!(permission = permission.as_str(), "notification permission requested");
        if permission == Permission::Granted {
            self.show_notification("Notifications Allowed", "You will now receive notifications.");
        }
        permission
    }
}

/// Prints notifications as `[title] body` lines; the permission answer comes
/// from configuration.
#[derive(Debug)]
pub struct TerminalBackend<W> {
    permission: Permission,
    out: W,
}

impl TerminalBackend<io::Stderr> {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let permission = match cfg.get("notifications") {
            Some(raw) => Permission::parse(&raw)?,
            None => Permission::Granted,
        };
        Ok(Self::new(permission, io::stderr()))
    }
}

impl<W: Write> TerminalBackend<W> {
    pub fn new(permission: Permission, out: W) -> Self {
        Self { permission, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> NotificationBackend for TerminalBackend<W> {
    fn request_permission(&mut self) -> Permission {
        self.permission
    }

    fn show(&mut self, notification: &Notification) -> anyhow::Result<()> {
        debug!(icon = %notification.icon, "showing terminal notification");
        writeln!(self.out, "[{}] {}", notification.title, notification.body)
            .context("failed to write notification")?;
        self.out.flush().context("failed to flush notification")?;
        Ok(())
    }
}

/// Keeps everything it is asked to show; used to observe notifications in
/// tests and embedders.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    permission: Permission,
    fail_delivery: bool,
    permission_requests: usize,
    shown: Vec<Notification>,
}

impl RecordingBackend {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission,
            fail_delivery: false,
            permission_requests: 0,
            shown: Vec::new(),
        }
    }

    /// A backend whose permission is granted but every delivery fails.
    pub fn failing() -> Self {
        Self {
            fail_delivery: true,
            ..Self::new(Permission::Granted)
        }
    }

    pub fn set_permission(&mut self, permission: Permission) {
        self.permission = permission;
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests
    }

    pub fn shown(&self) -> &[Notification] {
        &self.shown
    }
}

impl NotificationBackend for RecordingBackend {
    fn request_permission(&mut self) -> Permission {
        self.permission_requests += 1;
        self.permission
    }

    fn show(&mut self, notification: &Notification) -> anyhow::Result<()> {
        if self.fail_delivery {
            return Err(anyhow!("delivery refused"));
        }
        self.shown.push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_only_when_granted() {
        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Denied), DEFAULT_ICON);
        assert!(!notifier.show_notification("Task Added", "body"));
        assert!(notifier.backend().shown().is_empty());

        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Unsupported), DEFAULT_ICON);
        assert!(!notifier.show_notification("Task Added", "body"));

        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Granted), "icon.png");
        assert!(notifier.show_notification("Task Added", "body"));
        assert_eq!(
            notifier.backend().shown(),
            &[Notification {
                title: "Task Added".to_string(),
                body: "body".to_string(),
                icon: "icon.png".to_string(),
            }]
        );
    }

    #[test]
    fn permission_is_requested_on_every_call() {
        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Granted), DEFAULT_ICON);
        notifier.show_notification("a", "b");
        notifier.show_notification("c", "d");
        assert_eq!(notifier.backend().permission_requests(), 2);
    }

    #[test]
    fn permission_changes_apply_to_the_next_notification() {
        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Denied), DEFAULT_ICON);
        assert!(!notifier.show_notification("Task Added", "first"));

        notifier.backend.set_permission(Permission::Granted);
        assert!(notifier.show_notification("Task Added", "second"));
        assert_eq!(notifier.backend().shown().len(), 1);
        assert_eq!(notifier.backend().shown()[0].body, "second");
    }

    #[test]
    fn granted_prompt_confirms() {
        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Granted), DEFAULT_ICON);
        assert_eq!(notifier.request_notification_permission(), Permission::Granted);
        assert_eq!(notifier.backend().shown().len(), 1);
        assert_eq!(notifier.backend().shown()[0].title, "Notifications Allowed");

        let mut notifier = Notifier::new(RecordingBackend::new(Permission::Denied), DEFAULT_ICON);
        assert_eq!(notifier.request_notification_permission(), Permission::Denied);
        assert!(notifier.backend().shown().is_empty());
    }

    #[test]
    fn delivery_failure_is_swallowed() {
        let mut notifier = Notifier::new(RecordingBackend::failing(), DEFAULT_ICON);
        assert!(!notifier.show_notification("Task Added", "body"));
    }

    #[test]
    fn terminal_backend_writes_lines() {
        let mut notifier = Notifier::new(TerminalBackend::new(Permission::Granted, Vec::new()), DEFAULT_ICON);
        notifier.show_notification("Task Added", "Task \"Pay bills\" has been added.");
        let Notifier { backend, .. } = notifier;
        let written = String::from_utf8(backend.into_inner()).expect("utf8");
        assert_eq!(written, "[Task Added] Task \"Pay bills\" has been added.\n");
    }

    #[test]
    fn parses_permission_setting() {
        assert_eq!(Permission::parse("on").expect("on"), Permission::Granted);
        assert_eq!(Permission::parse("Denied").expect("denied"), Permission::Denied);
        assert_eq!(Permission::parse("unsupported").expect("unsupported"), Permission::Unsupported);
        assert!(Permission::parse("maybe").is_err());
    }
}
