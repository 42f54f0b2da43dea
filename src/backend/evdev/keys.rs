//! Key and button bookkeeping.

use tracing::warn;

use super::codes::{
    BTN_DPAD_UP, BTN_GEAR_UP, BTN_MISC, BTN_TOUCH, BTN_TRIGGER_HAPPY40, KEY_CNT, KEY_ESC,
    KEY_LIGHTS_TOGGLE, KEY_MICMUTE, KEY_OK,
};

/// Class of a kernel key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Not delivered to consumers (e.g. `BTN_TOUCH`, tool switches).
    None,
    /// A keyboard key.
    Key,
    /// A pointer button.
    Button,
}

/// Classifies a key code into keyboard key, pointer button or neither.
pub fn key_type(code: u16) -> KeyType {
    // BTN_TOUCH lies inside the button range but never leaves the touch
    // pipeline, so it is carved out first.
    match code {
        BTN_TOUCH => KeyType::None,
        KEY_ESC..=KEY_MICMUTE => KeyType::Key,
        BTN_MISC..=BTN_GEAR_UP => KeyType::Button,
        KEY_OK..=KEY_LIGHTS_TOGGLE => KeyType::Key,
        BTN_DPAD_UP..=BTN_TRIGGER_HAPPY40 => KeyType::Button,
        _ => KeyType::None,
    }
}

const DOWN_WORDS: usize = (KEY_CNT + 63) / 64;

/// Per-code press bookkeeping of one device.
///
/// Tracks which codes are physically down (to drop releases that were never
/// pressed) and a per-code press count, so that redundant press/release
/// pairs collapse into a single notification on the 0↔1 edges.
pub(crate) struct KeyCounter {
    down: [u64; DOWN_WORDS],
    count: Box<[u32; KEY_CNT]>,
}

impl std::fmt::Debug for KeyCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCounter")
            .field("pressed", &self.pressed_codes().count())
            .finish()
    }
}

impl KeyCounter {
    pub(crate) fn new() -> KeyCounter {
        KeyCounter {
            down: [0; DOWN_WORDS],
            count: Box::new([0; KEY_CNT]),
        }
    }

    pub(crate) fn is_down(&self, code: u16) -> bool {
        (code as usize) < KEY_CNT && self.down[code as usize / 64] & (1 << (code % 64)) != 0
    }

    /// Records a press. Returns `true` on the 0→1 edge.
    pub(crate) fn press(&mut self, code: u16) -> bool {
        if (code as usize) >= KEY_CNT {
            return false;
        }
        self.down[code as usize / 64] |= 1 << (code % 64);
        let count = &mut self.count[code as usize];
        *count += 1;
        if *count > 32 {
            warn!(code, count = *count, "key press count exceeds plausible bounds");
        }
        *count == 1
    }

    /// Records a release. Returns `true` on the 1→0 edge.
    pub(crate) fn release(&mut self, code: u16) -> bool {
        if (code as usize) >= KEY_CNT {
            return false;
        }
        self.down[code as usize / 64] &= !(1 << (code % 64));
        let count = &mut self.count[code as usize];
        if *count == 0 {
            warn!(code, "release of a key that was not pressed");
            return false;
        }
        *count -= 1;
        *count == 0
    }

    /// Codes with a positive press count, lowest first.
    pub(crate) fn pressed_codes(&self) -> impl Iterator<Item = u16> + '_ {
        (0..KEY_CNT as u16).filter(|code| self.count[*code as usize] > 0)
    }

    /// Forgets all state, used once releases have been synthesized.
    pub(crate) fn clear(&mut self) {
        self.down = [0; DOWN_WORDS];
        self.count.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::evdev::codes::{BTN_LEFT, KEY_A};

    #[test]
    fn classification_ranges() {
        assert_eq!(key_type(KEY_ESC), KeyType::Key);
        assert_eq!(key_type(KEY_A), KeyType::Key);
        assert_eq!(key_type(KEY_MICMUTE), KeyType::Key);
        assert_eq!(key_type(KEY_OK), KeyType::Key);
        assert_eq!(key_type(KEY_LIGHTS_TOGGLE), KeyType::Key);

        assert_eq!(key_type(BTN_MISC), KeyType::Button);
        assert_eq!(key_type(BTN_LEFT), KeyType::Button);
        assert_eq!(key_type(BTN_GEAR_UP), KeyType::Button);
        assert_eq!(key_type(BTN_DPAD_UP), KeyType::Button);
        assert_eq!(key_type(BTN_TRIGGER_HAPPY40), KeyType::Button);

        // BTN_TOUCH sits inside the button range but is not a button
        assert_eq!(key_type(BTN_TOUCH), KeyType::None);
        assert_eq!(key_type(0), KeyType::None);
        assert_eq!(key_type(KEY_MICMUTE + 1), KeyType::None);
        assert_eq!(key_type(KEY_LIGHTS_TOGGLE + 1), KeyType::None);
    }

    #[test]
    fn press_release_edges() {
        let mut keys = KeyCounter::new();
        assert!(keys.press(BTN_LEFT));
        assert!(keys.is_down(BTN_LEFT));
        assert!(!keys.press(BTN_LEFT)); // second press is swallowed
        assert!(!keys.release(BTN_LEFT));
        assert!(keys.release(BTN_LEFT));
        assert!(!keys.is_down(BTN_LEFT));
    }

    #[test]
    fn release_without_press_is_dropped() {
        let mut keys = KeyCounter::new();
        assert!(!keys.release(KEY_A));
        assert_eq!(keys.pressed_codes().count(), 0);
    }

    #[test]
    fn excessive_press_count_keeps_counting() {
        let mut keys = KeyCounter::new();
        for _ in 0..40 {
            keys.press(KEY_A);
        }
        for _ in 0..39 {
            assert!(!keys.release(KEY_A));
        }
        assert!(keys.release(KEY_A));
    }

    #[test]
    fn pressed_codes_reports_held_keys() {
        let mut keys = KeyCounter::new();
        keys.press(KEY_A);
        keys.press(BTN_LEFT);
        keys.press(BTN_LEFT);
        let held: Vec<u16> = keys.pressed_codes().collect();
        assert_eq!(held, vec![KEY_A, BTN_LEFT]);
        keys.clear();
        assert_eq!(keys.pressed_codes().count(), 0);
    }
}
