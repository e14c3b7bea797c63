//! Display-Name Sanitisation
//!
//! Names are immutable after creation, so sanitisation happens exactly once
//! on the create/join path. The transform is idempotent: feeding a
//! sanitised name back through produces the same string.

use crate::core::constants::{BANNED_NAME_WORDS, MAX_NAME_LEN};

/// Sanitise a requested display name.
///
/// Trims surrounding whitespace, truncates to [`MAX_NAME_LEN`] characters,
/// then masks every vowel with `*` if any banned substring matches
/// case-insensitively. The masked result is the canonical name.
pub fn sanitize_name(raw: &str) -> String {
    let trimmed: String = raw.trim().chars().take(MAX_NAME_LEN).collect();

    let lowered = trimmed.to_lowercase();
    if BANNED_NAME_WORDS.iter().any(|w| lowered.contains(w)) {
        trimmed
            .chars()
            .map(|c| if is_vowel(c) { '*' } else { c })
            .collect()
    } else {
        trimmed
    }
}

#[inline]
fn is_vowel(c: char) -> bool {
    matches!(
        c,
        'a' | 'e' | 'i' | 'o' | 'u' | 'A' | 'E' | 'I' | 'O' | 'U'
    )
}
