//! Keybinding dispatch.
//!
//! A chord is an exact (modifier set, keysym) pair; there are no prefix or
//! chord sequences. Callers pass modifiers already cleaned of NumLock and
//! CapsLock. An unbound chord is not an error: the X server only delivers
//! grabbed keys, so a miss here means the grab set and the binding table
//! disagree, which is worth a log line but nothing more.

use std::collections::HashMap;

use crate::config::Action;

/// A modifier-plus-key combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: u16,
    pub keysym: u32,
}

/// Immutable chord -> action table, built once from config.
#[derive(Debug, Default)]
pub struct KeyBindings {
    bindings: HashMap<Chord, Action>,
}

impl KeyBindings {
    pub fn new(bindings: HashMap<Chord, Action>) -> Self {
        Self { bindings }
    }

    /// Exact-match lookup. `None` for unbound chords.
    pub fn resolve(&self, modifiers: u16, keysym: u32) -> Option<&Action> {
        let action = self.bindings.get(&Chord { modifiers, keysym });
        if action.is_none() {
            log::debug!(
                "Unbound chord: modifiers=0x{:x} keysym=0x{:x}",
                modifiers,
                keysym
            );
        }
        action
    }

    /// All bound chords, for key grabbing.
    pub fn chords(&self) -> impl Iterator<Item = &Chord> {
        self.bindings.keys()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> KeyBindings {
        let mut map = HashMap::new();
        map.insert(Chord { modifiers: 64, keysym: 0x6a }, Action::FocusNext);
        map.insert(Chord { modifiers: 64 | 1, keysym: 0x31 }, Action::MoveToWorkspace(0));
        KeyBindings::new(map)
    }

    #[test]
    fn resolve_is_exact_match() {
        let keys = table();
        assert_eq!(keys.resolve(64, 0x6a), Some(&Action::FocusNext));
        assert_eq!(keys.resolve(64 | 1, 0x31), Some(&Action::MoveToWorkspace(0)));

        // Same keysym with different modifiers does not match.
        assert_eq!(keys.resolve(0, 0x6a), None);
        assert_eq!(keys.resolve(64 | 4, 0x6a), None);
    }

    #[test]
    fn unbound_chord_is_none() {
        let keys = table();
        // Ctrl+Alt+F13 equivalent: nothing bound there.
        assert_eq!(keys.resolve(4 | 8, 0xffca), None);
    }

    #[test]
    fn chords_enumerate_the_grab_set() {
        let keys = table();
        assert_eq!(keys.chords().count(), 2);
        assert_eq!(keys.len(), 2);
        assert!(!keys.is_empty());
    }
}
