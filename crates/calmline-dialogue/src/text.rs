//! Keyword matching over caller transcripts.
//!
//! Transcripts are normalized before matching: lowercase, apostrophes
//! removed, every other non-alphanumeric character turned into a space.
//! Phrases then match on word boundaries, so "reschedule" does not count as
//! "schedule".

/// Normalizes text for keyword matching.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// True if `phrase` occurs in already-normalized `text` on word boundaries.
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let phrase = normalize(phrase);
    if phrase.is_empty() {
        return false;
    }
    let haystack = format!(" {} ", normalized);
    haystack.contains(&format!(" {} ", phrase))
}

pub fn contains_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(normalized, p))
}

/// Number of distinct phrases present in the text.
pub fn count_matches(normalized: &str, phrases: &[&str]) -> usize {
    phrases
        .iter()
        .filter(|p| contains_phrase(normalized, p))
        .count()
}

/// Phrase match that ignores spacing between words.
///
/// Used where a miss is worse than a false alarm: "killmyself" and
/// "kill-my-self" still match "kill myself". The match must still start
/// and end on word boundaries.
pub fn contains_loose(normalized: &str, phrase: &str) -> bool {
    let target: Vec<char> = normalize(phrase)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if target.is_empty() {
        return false;
    }
    let chars: Vec<char> = normalized.chars().collect();
    for start in 0..chars.len() {
        if chars[start] == ' ' || (start > 0 && chars[start - 1] != ' ') {
            continue;
        }
        let mut i = start;
        let mut matched = 0;
        while i < chars.len() && matched < target.len() {
            if chars[i] == ' ' {
                i += 1;
                continue;
            }
            if chars[i] != target[matched] {
                break;
            }
            matched += 1;
            i += 1;
        }
        if matched == target.len() && (i == chars.len() || chars[i] == ' ') {
            return true;
        }
    }
    false
}
