use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

/// User-visible toast surface.
pub trait Notifier: Send + Sync {
    fn show(&self, kind: NoticeKind, message: &str);
}

/// Fans notices out to every UI subscriber.
pub struct ChannelNotifier {
    notices: broadcast::Sender<Notice>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(capacity.max(1));
        Self { notices }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn show(&self, kind: NoticeKind, message: &str) {
        if self
            .notices
            .send(Notice {
                kind,
                message: message.to_string(),
            })
            .is_err()
        {
            debug!(?kind, text = message, "notify: no subscribers");
        }
    }
}
