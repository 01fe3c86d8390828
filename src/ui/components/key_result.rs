use crate::ui::view::ViewAction;

/// What an overlay (search line, command line) did with a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Consumed, nothing for the owner to do
  Handled,
  /// Consumed, and the owner has to react to `T`
  Event(T),
  /// Not for this overlay; the owner handles the key itself
  NotHandled,
}

impl<T> KeyResult<T> {
  /// Turn the result into the owning view's reply, if the overlay took the key.
  ///
  /// Views chain this with `or_else` into their own key handlers.
  pub fn into_action(self, on_event: impl FnOnce(T) -> ViewAction) -> Option<ViewAction> {
    match self {
      KeyResult::Handled => Some(ViewAction::None),
      KeyResult::Event(event) => Some(on_event(event)),
      KeyResult::NotHandled => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_into_action() {
    let handled: KeyResult<u8> = KeyResult::Handled;
    assert!(matches!(handled.into_action(|_| ViewAction::Pop), Some(ViewAction::None)));

    let event = KeyResult::Event(3u8);
    assert!(matches!(
      event.into_action(|n| if n == 3 { ViewAction::Pop } else { ViewAction::None }),
      Some(ViewAction::Pop)
    ));

    let ignored: KeyResult<u8> = KeyResult::NotHandled;
    assert!(ignored.into_action(|_| ViewAction::Pop).is_none());
  }
}
