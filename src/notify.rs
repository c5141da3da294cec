//! User-facing notices about offline sales.
//!
//! These are the non-blocking "toasts" of the terminal: nothing here ever
//! interrupts the caller.

use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Info,
  Success,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  /// A batch retry is starting
  SyncStarted { count: usize },
  /// The backend confirmed `count` pending sales
  Synced { count: usize },
  /// A sale failed again but has attempts left
  RetryScheduled {
    id: String,
    attempt: u32,
    reason: String,
  },
  /// A sale used up its attempts (or was rejected outright) and was dropped
  Exhausted {
    id: String,
    attempts: u32,
    reason: String,
  },
  /// The whole batch call failed
  BatchFailed {
    retrying: usize,
    dropped: usize,
    reason: String,
  },
  /// Live submission failed; the sale is queued for retry
  SavedOffline { id: String, reason: String },
}

impl Notice {
  pub fn severity(&self) -> Severity {
    match self {
      Notice::SyncStarted { .. } => Severity::Info,
      Notice::Synced { .. } => Severity::Success,
      Notice::RetryScheduled { .. } | Notice::BatchFailed { dropped: 0, .. } => Severity::Warning,
      Notice::Exhausted { .. } | Notice::BatchFailed { .. } | Notice::SavedOffline { .. } => {
        Severity::Error
      }
    }
  }
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Notice::SyncStarted { count } => {
        write!(f, "Attempting to sync {} pending sale(s)...", count)
      }
      Notice::Synced { count } => write!(f, "Successfully synced {} sale(s)!", count),
      Notice::RetryScheduled {
        id,
        attempt,
        reason,
      } => write!(f, "Sync failed for sale {} (attempt {}): {}", id, attempt, reason),
      Notice::Exhausted {
        id,
        attempts,
        reason,
      } => write!(
        f,
        "Gave up on sale {} after {} attempt(s): {}",
        id, attempts, reason
      ),
      Notice::BatchFailed {
        retrying,
        dropped,
        reason,
      } => {
        write!(f, "Sync failed: {}.", reason)?;
        if *dropped > 0 {
          write!(f, " Removed {} sale(s) after too many attempts.", dropped)?;
        }
        if *retrying > 0 {
          write!(f, " Will retry {} sale(s) later.", retrying)?;
        }
        Ok(())
      }
      Notice::SavedOffline { id, reason } => write!(
        f,
        "Failed to create sale: {}. Saved locally as {} and will be retried automatically.",
        reason, id
      ),
    }
  }
}

pub trait Notifier: Send + Sync {
  fn notify(&self, notice: Notice);
}

/// Writes notices to stderr and the log.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn notify(&self, notice: Notice) {
    let severity = notice.severity();
    match severity {
      Severity::Info | Severity::Success => info!(%notice, "notice"),
      Severity::Warning => warn!(%notice, "notice"),
      Severity::Error => error!(%notice, "notice"),
    }

    let tag = match severity {
      Severity::Info => "info",
      Severity::Success => "ok",
      Severity::Warning => "warn",
      Severity::Error => "error",
    };
    eprintln!("[{}] {}", tag, notice);
  }
}

/// Keeps every notice, for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  notices: std::sync::Mutex<Vec<Notice>>,
}

#[cfg(test)]
impl RecordingNotifier {
  pub fn notices(&self) -> Vec<Notice> {
    self.notices.lock().unwrap().clone()
  }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
  fn notify(&self, notice: Notice) {
    self.notices.lock().unwrap().push(notice);
  }
}
