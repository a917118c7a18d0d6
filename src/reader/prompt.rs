use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A pending yes/no question with a deadline.
#[derive(Debug)]
pub struct TimedConfirm {
    pub title: String,
    pub message: String,
    deadline: Instant,
    default: bool,
    answer: oneshot::Receiver<bool>,
}

/// The answering side. Dropping it leaves the question to its deadline.
#[derive(Debug)]
pub struct ConfirmHandle {
    tx: oneshot::Sender<bool>,
}

pub fn timed_confirm(
    title: impl Into<String>,
    message: impl Into<String>,
    timeout: Duration,
    default: bool,
) -> (TimedConfirm, ConfirmHandle) {
    let (tx, answer) = oneshot::channel();
    let confirm = TimedConfirm {
        title: title.into(),
        message: message.into(),
        deadline: Instant::now() + timeout,
        default,
        answer,
    };
    (confirm, ConfirmHandle { tx })
}

impl ConfirmHandle {
    pub fn answer(self, yes: bool) {
        let _ = self.tx.send(yes);
    }

    /// Resolves once the question has been settled or abandoned.
    pub async fn closed(&mut self) {
        self.tx.closed().await
    }
}

impl TimedConfirm {
    pub fn default_answer(&self) -> bool {
        self.default
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Countdown line, computed from the deadline each time it is drawn.
    pub fn countdown(&self) -> String {
        let secs = self.remaining().as_secs_f32().ceil() as u64;
        let fallback = if self.default { "确认" } else { "取消" };
        format!("{} ({} 秒后自动{})", self.message, secs, fallback)
    }

    pub async fn wait(self) -> bool {
        let default = self.default;
        tokio::select! {
            Ok(answer) = self.answer => answer,
            _ = tokio::time::sleep_until(self.deadline) => default,
        }
    }
}
