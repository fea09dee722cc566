//! Notifier Registry Module
//!
//! Deduplicated per-object event subscriptions, one fixed registry per event
//! kind: keyboard-modifier changes, screen configuration changes, and error
//! messages. Entries are keyed by the requesting object's handle, so
//! re-registering replaces the stored configuration instead of duplicating
//! the subscription.
//!
//! All three registries for a session sit behind one mutex (held by the
//! owning `WsSession`): registration runs on the session's own dispatch path
//! while delivery can be driven by another session's dispatch path through a
//! server broadcast, and the two must never interleave partially.

use std::collections::HashMap;
use tracing::debug;

use crate::ws::common::{EventControl, EventModifiers};

/// Configuration of one modifier-change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModNotifier {
    /// Which modifier keys the subscriber cares about.
    pub modifiers: EventModifiers,
    pub when: EventControl,
}

/// Configuration of one error-message subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorNotifier {
    pub when: EventControl,
}

/// The three fixed registries of one session.
#[derive(Default)]
pub struct Notifiers {
    mod_notifiers: HashMap<u32, ModNotifier>,
    screen_change: HashMap<u32, ()>,
    error_notifiers: HashMap<u32, ErrorNotifier>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a modifier-change subscription for an object.
    pub fn add_mod_notifier(&mut self, user_handle: u32, notifier: ModNotifier) {
        if self.mod_notifiers.insert(user_handle, notifier).is_some() {
            debug!("Replaced modifier notifier for object {}", user_handle);
        }
    }

    /// Register a screen-change subscription; carries no configuration.
    pub fn add_screen_change_notifier(&mut self, user_handle: u32) {
        self.screen_change.insert(user_handle, ());
    }

    /// Register (or replace) an error-message subscription for an object.
    pub fn add_error_notifier(&mut self, user_handle: u32, notifier: ErrorNotifier) {
        if self.error_notifiers.insert(user_handle, notifier).is_some() {
            debug!("Replaced error notifier for object {}", user_handle);
        }
    }

    /// Object handles whose modifier mask intersects the changed modifiers,
    /// honoring each entry's when-control.
    pub fn mods_matching(&self, changed: EventModifiers, has_focus: bool) -> Vec<u32> {
        self.mod_notifiers
            .iter()
            .filter(|(_, n)| n.modifiers.intersects(changed) && deliverable(n.when, has_focus))
            .map(|(h, _)| *h)
            .collect()
    }

    /// Every registered screen-change subscriber.
    pub fn screen_change_targets(&self) -> Vec<u32> {
        self.screen_change.keys().copied().collect()
    }

    /// Error subscribers whose when-control admits delivery right now.
    pub fn errors_matching(&self, has_focus: bool) -> Vec<u32> {
        self.error_notifiers
            .iter()
            .filter(|(_, n)| deliverable(n.when, has_focus))
            .map(|(h, _)| *h)
            .collect()
    }

    /// Remove every subscription owned by a deleted object.
    pub fn remove_for(&mut self, user_handle: u32) {
        self.mod_notifiers.remove(&user_handle);
        self.screen_change.remove(&user_handle);
        self.error_notifiers.remove(&user_handle);
    }

    /// Drop everything. Used by session teardown.
    pub fn clear(&mut self) {
        self.mod_notifiers.clear();
        self.screen_change.clear();
        self.error_notifiers.clear();
    }

    pub fn mod_notifier_count(&self) -> usize {
        self.mod_notifiers.len()
    }

    pub fn screen_change_count(&self) -> usize {
        self.screen_change.len()
    }

    pub fn error_notifier_count(&self) -> usize {
        self.error_notifiers.len()
    }
}

fn deliverable(when: EventControl, has_focus: bool) -> bool {
    match when {
        EventControl::Always => true,
        EventControl::OnlyWithKeyboardFocus => has_focus,
        EventControl::Never => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reregister_replaces_not_duplicates() {
        let mut nof = Notifiers::new();
        nof.add_mod_notifier(
            7,
            ModNotifier {
                modifiers: EventModifiers::SHIFT,
                when: EventControl::Always,
            },
        );
        nof.add_mod_notifier(
            7,
            ModNotifier {
                modifiers: EventModifiers::CTRL,
                when: EventControl::Always,
            },
        );

        assert_eq!(nof.mod_notifier_count(), 1);
        // Latest configuration wins.
        assert!(nof.mods_matching(EventModifiers::CTRL, false).contains(&7));
        assert!(nof.mods_matching(EventModifiers::SHIFT, false).is_empty());
    }

    #[test]
    fn test_matching_delivers_each_object_once() {
        let mut nof = Notifiers::new();
        for h in [1, 2, 3] {
            nof.add_screen_change_notifier(h);
            nof.add_screen_change_notifier(h); // double registration
        }
        let mut targets = nof.screen_change_targets();
        targets.sort_unstable();
        assert_eq!(targets, vec![1, 2, 3]);
    }

    #[test]
    fn test_when_control_respected() {
        let mut nof = Notifiers::new();
        nof.add_error_notifier(1, ErrorNotifier { when: EventControl::Always });
        nof.add_error_notifier(
            2,
            ErrorNotifier {
                when: EventControl::OnlyWithKeyboardFocus,
            },
        );
        nof.add_error_notifier(3, ErrorNotifier { when: EventControl::Never });

        let mut unfocused = nof.errors_matching(false);
        unfocused.sort_unstable();
        assert_eq!(unfocused, vec![1]);

        let mut focused = nof.errors_matching(true);
        focused.sort_unstable();
        assert_eq!(focused, vec![1, 2]);
    }

    #[test]
    fn test_remove_for_purges_all_kinds() {
        let mut nof = Notifiers::new();
        nof.add_mod_notifier(
            4,
            ModNotifier {
                modifiers: EventModifiers::ALT,
                when: EventControl::Always,
            },
        );
        nof.add_screen_change_notifier(4);
        nof.add_error_notifier(4, ErrorNotifier { when: EventControl::Always });

        nof.remove_for(4);
        assert_eq!(nof.mod_notifier_count(), 0);
        assert_eq!(nof.screen_change_count(), 0);
        assert_eq!(nof.error_notifier_count(), 0);
    }
}
