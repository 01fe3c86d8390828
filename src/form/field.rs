//! Debounced edit state of a single form field.
//!
//! A field moves `Clean -> Dirty` on input, `Dirty -> Committing` on blur or
//! after [`DEBOUNCE_MS`] without input, and back to `Clean` once the owner
//! acknowledges the commit. [`reduce`] is pure; [`FieldModel::dispatch`] is
//! the in-place convenience used by the form.

/// Inactivity window after which a dirty field commits on its own.
pub const DEBOUNCE_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
  /// Local value equals the authoritative value
  Clean,
  /// User typed; local value diverges
  Dirty,
  /// Local value handed to the owner, waiting for the merge
  Committing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEvent {
  Input { value: String, at_ms: i64 },
  Blur,
  Tick { now_ms: i64 },
  /// Owner merged the value emitted by the last commit
  Committed,
  /// Authoritative value changed from elsewhere (auto-fill, reload)
  External(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldModel {
  pub state: FieldState,
  /// What the user sees
  pub local: String,
  /// Last value merged into the record
  pub committed: String,
  pending: Option<String>,
  last_input_ms: i64,
}

impl FieldModel {
  pub fn new(value: impl Into<String>) -> Self {
    let value = value.into();
    Self {
      state: FieldState::Clean,
      local: value.clone(),
      committed: value,
      pending: None,
      last_input_ms: 0,
    }
  }

  pub fn is_dirty(&self) -> bool {
    self.state == FieldState::Dirty
  }

  /// Apply `event` in place, returning the value to merge if a commit fired.
  pub fn dispatch(&mut self, event: FieldEvent) -> Option<String> {
    let (next, commit) = reduce(self, event);
    *self = next;
    commit
  }
}

/// Next state for `event`, plus the value to merge when a commit fires.
pub fn reduce(model: &FieldModel, event: FieldEvent) -> (FieldModel, Option<String>) {
  let mut next = model.clone();

  match event {
    FieldEvent::Input { value, at_ms } => {
      next.last_input_ms = at_ms;
      next.local = value;
      // Input during a commit is picked up when the commit is acknowledged
      next.state = match model.state {
        FieldState::Committing => FieldState::Committing,
        _ if next.local == next.committed => FieldState::Clean,
        _ => FieldState::Dirty,
      };
      (next, None)
    }

    FieldEvent::Blur => match model.state {
      FieldState::Dirty => begin_commit(next),
      _ => (next, None),
    },

    FieldEvent::Tick { now_ms } => match model.state {
      FieldState::Dirty if now_ms - model.last_input_ms >= DEBOUNCE_MS => begin_commit(next),
      _ => (next, None),
    },

    FieldEvent::Committed => {
      if let Some(value) = next.pending.take() {
        next.committed = value;
      }
      next.state = if next.local == next.committed {
        FieldState::Clean
      } else {
        FieldState::Dirty
      };
      (next, None)
    }

    FieldEvent::External(value) => {
      next.committed = value.clone();
      if model.state == FieldState::Clean {
        next.local = value;
      } else if next.local == next.committed && model.state == FieldState::Dirty {
        next.state = FieldState::Clean;
      }
      (next, None)
    }
  }
}

fn begin_commit(mut next: FieldModel) -> (FieldModel, Option<String>) {
  next.state = FieldState::Committing;
  next.pending = Some(next.local.clone());
  let value = next.local.clone();
  (next, Some(value))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn input(value: &str, at_ms: i64) -> FieldEvent {
    FieldEvent::Input {
      value: value.to_string(),
      at_ms,
    }
  }

  #[test]
  fn test_typing_then_blur_commits_once() {
    let mut field = FieldModel::new("");
    let mut commits = Vec::new();

    for (value, at) in [("A", 0), ("AB", 200), ("ABC", 400)] {
      commits.extend(field.dispatch(input(value, at)));
      commits.extend(field.dispatch(FieldEvent::Tick { now_ms: at + 100 }));
    }
    commits.extend(field.dispatch(FieldEvent::Blur));
    assert_eq!(field.state, FieldState::Committing);
    field.dispatch(FieldEvent::Committed);

    // Later ticks and blurs have nothing to commit
    commits.extend(field.dispatch(FieldEvent::Tick { now_ms: 5_000 }));
    commits.extend(field.dispatch(FieldEvent::Blur));

    assert_eq!(commits, vec!["ABC".to_string()]);
    assert_eq!(field.state, FieldState::Clean);
    assert_eq!(field.committed, "ABC");
  }

  #[test]
  fn test_debounce_commits_after_inactivity() {
    let mut field = FieldModel::new("");
    field.dispatch(input("parecer", 1_000));

    assert_eq!(field.dispatch(FieldEvent::Tick { now_ms: 1_999 }), None);
    assert_eq!(
      field.dispatch(FieldEvent::Tick { now_ms: 2_000 }),
      Some("parecer".to_string())
    );
  }

  #[test]
  fn test_typing_resets_debounce() {
    let mut field = FieldModel::new("");
    field.dispatch(input("a", 0));
    field.dispatch(input("ab", 900));
    assert_eq!(field.dispatch(FieldEvent::Tick { now_ms: 1_500 }), None);
    assert!(field.dispatch(FieldEvent::Tick { now_ms: 1_900 }).is_some());
  }

  #[test]
  fn test_reverting_input_is_clean() {
    let mut field = FieldModel::new("x");
    field.dispatch(input("xy", 0));
    assert!(field.is_dirty());
    field.dispatch(input("x", 10));
    assert_eq!(field.state, FieldState::Clean);
    assert_eq!(field.dispatch(FieldEvent::Blur), None);
  }

  #[test]
  fn test_input_during_commit_stays_dirty() {
    let mut field = FieldModel::new("");
    field.dispatch(input("a", 0));
    assert_eq!(field.dispatch(FieldEvent::Blur), Some("a".to_string()));

    field.dispatch(input("ab", 10));
    field.dispatch(FieldEvent::Committed);

    assert_eq!(field.committed, "a");
    assert_eq!(field.state, FieldState::Dirty);
    assert_eq!(field.dispatch(FieldEvent::Blur), Some("ab".to_string()));
  }

  #[test]
  fn test_external_update_does_not_clobber_edits() {
    let mut clean = FieldModel::new("");
    clean.dispatch(FieldEvent::External("01/03/2024".to_string()));
    assert_eq!(clean.local, "01/03/2024");
    assert_eq!(clean.state, FieldState::Clean);

    let mut dirty = FieldModel::new("");
    dirty.dispatch(input("02/03", 0));
    dirty.dispatch(FieldEvent::External("01/03/2024".to_string()));
    assert_eq!(dirty.local, "02/03");
    assert_eq!(dirty.committed, "01/03/2024");
    assert!(dirty.is_dirty());
  }

  #[test]
  fn test_reduce_is_pure() {
    let field = FieldModel::new("");
    let (next, commit) = reduce(&field, input("a", 0));
    assert_eq!(field.state, FieldState::Clean);
    assert_eq!(next.state, FieldState::Dirty);
    assert_eq!(commit, None);
  }
}
