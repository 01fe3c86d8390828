use crossterm::event::KeyEvent;
use ratatui::prelude::*;
use std::time::{Duration, Instant};

/// A keyboard shortcut hint for display in the header
#[derive(Debug, Clone)]
pub struct ShortcutInfo {
  pub key: &'static str,
  pub label: &'static str,
  pub priority: u8, // Lower = shown first
}

impl ShortcutInfo {
  pub const fn new(key: &'static str, label: &'static str) -> Self {
    Self {
      key,
      label,
      priority: 100,
    }
  }

  pub const fn with_priority(mut self, priority: u8) -> Self {
    self.priority = priority;
    self
  }
}

pub type Shortcut = ShortcutInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Error,
}

/// Dismissible status-bar message
#[derive(Debug, Clone)]
pub struct Notice {
  pub message: String,
  pub level: NoticeLevel,
  shown_at: Instant,
}

impl Notice {
  /// How long a notice stays up if not dismissed
  pub const TTL: Duration = Duration::from_secs(8);

  pub fn info(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      level: NoticeLevel::Info,
      shown_at: Instant::now(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      level: NoticeLevel::Error,
      shown_at: Instant::now(),
    }
  }

  pub fn expired(&self) -> bool {
    self.shown_at.elapsed() > Self::TTL
  }
}

/// Actions that a view can request in response to user input
pub enum ViewAction {
  /// No action needed
  None,
  /// Push a new view onto the stack
  Push(Box<dyn View>),
  /// Pop current view from stack (go back)
  Pop,
}

/// Trait for view behavior
///
/// Views handle their own input modes (search, edit, etc.) and return
/// actions for the App to execute. This creates a clean delegation chain:
/// App → View → Components
///
/// Views that load data asynchronously should use Query<T> internally and
/// poll it in the tick() method. A popped view drops its queries, so late
/// results for it are discarded.
pub trait View {
  /// Handle a key event, returning an action for App to execute
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction;

  /// Render the view to the frame
  fn render(&mut self, frame: &mut Frame, area: Rect);

  /// Get the breadcrumb label for this view
  fn breadcrumb_label(&self) -> String;

  /// Patient this view is about, for commands that need one
  fn patient(&self) -> Option<(u64, String)> {
    None
  }

  /// Called on each tick to allow views to poll async queries
  fn tick(&mut self) {}

  /// Called when the view above this one was popped
  fn on_resume(&mut self) {}

  /// Reload data after the cache was reset or flagged stale
  fn reload(&mut self) {}

  /// Whether every printable key should go to the view (no `:` command mode)
  fn captures_input(&self) -> bool {
    false
  }

  /// Message for the status bar, taken once
  fn take_notice(&mut self) -> Option<Notice> {
    None
  }

  /// Get keyboard shortcuts to display in the header
  /// Override this to provide view-specific shortcuts
  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("/", "search").with_priority(20),
      ShortcutInfo::new("q", "back").with_priority(30),
    ]
  }
}
