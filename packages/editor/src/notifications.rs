//! User-facing error and warning notifications.

use plater_common::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Error,
    Warning,
}

/// Where "jump to cause" should take the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpTarget {
    Object(ObjectId),
    Option(String),
}

pub trait NotificationSink {
    fn push_error(&mut self, text: &str, jump: Option<JumpTarget>);

    fn push_warning(&mut self, text: &str);

    /// Remove every notification of `kind`
    fn clear(&mut self, kind: NotificationKind);
}

/// Sink that only writes to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn push_error(&mut self, text: &str, jump: Option<JumpTarget>) {
        tracing::error!(jump = ?jump, "{}", text);
    }

    fn push_warning(&mut self, text: &str) {
        tracing::warn!("{}", text);
    }

    fn clear(&mut self, kind: NotificationKind) {
        tracing::debug!("cleared {:?} notifications", kind);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
    pub jump: Option<JumpTarget>,
}

/// Keeps the visible notifications plus a count of every push
#[derive(Debug, Default)]
pub struct RecordingSink {
    visible: Vec<Notification>,
    pub errors_pushed: usize,
    pub warnings_pushed: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> &[Notification] {
        &self.visible
    }

    pub fn errors(&self) -> Vec<&Notification> {
        self.of_kind(NotificationKind::Error)
    }

    pub fn warnings(&self) -> Vec<&Notification> {
        self.of_kind(NotificationKind::Warning)
    }

    fn of_kind(&self, kind: NotificationKind) -> Vec<&Notification> {
        self.visible.iter().filter(|n| n.kind == kind).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn push_error(&mut self, text: &str, jump: Option<JumpTarget>) {
        self.errors_pushed += 1;
        self.visible.push(Notification {
            kind: NotificationKind::Error,
            text: text.to_string(),
            jump,
        });
    }

    fn push_warning(&mut self, text: &str) {
        self.warnings_pushed += 1;
        self.visible.push(Notification {
            kind: NotificationKind::Warning,
            text: text.to_string(),
            jump: None,
        });
    }

    fn clear(&mut self, kind: NotificationKind) {
        self.visible.retain(|n| n.kind != kind);
    }
}
