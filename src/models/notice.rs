#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct NoticeMessage {
    message: String,
    kind: NoticeKind,
}

impl NoticeMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Error,
        }
    }

    pub fn new(message: impl Into<String>) -> Self {
        Self::info(message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> NoticeKind {
        self.kind
    }
}
