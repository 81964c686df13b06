//! Macron vowel helpers shared by every detector.

/// Lowercase macron vowels. Uppercase forms fold onto these.
pub const MACRONS: [char; 5] = ['ā', 'ē', 'ī', 'ō', 'ū'];

/// Uppercase macron vowels, index-aligned with [`MACRONS`].
pub const MACRONS_UPPER: [char; 5] = ['Ā', 'Ē', 'Ī', 'Ō', 'Ū'];

const PLAIN: [char; 5] = ['a', 'e', 'i', 'o', 'u'];
const PLAIN_UPPER: [char; 5] = ['A', 'E', 'I', 'O', 'U'];

pub fn is_macron(c: char) -> bool {
    MACRONS.contains(&c) || MACRONS_UPPER.contains(&c)
}

/// Fold an uppercase macron vowel onto its lowercase form; other chars pass through.
pub fn fold_macron(c: char) -> char {
    match MACRONS_UPPER.iter().position(|&u| u == c) {
        Some(i) => MACRONS[i],
        None => c,
    }
}

/// Count macron vowels across all `parts`, case-insensitive.
/// Every occurrence counts, repeats included.
pub fn count_macrons<S: AsRef<str>>(parts: &[S]) -> usize {
    parts
        .iter()
        .map(|p| p.as_ref().chars().filter(|&c| is_macron(c)).count())
        .sum()
}

/// Replace every macron vowel by its plain vowel, preserving case.
pub fn strip_macrons(s: &str) -> String {
    s.chars()
        .map(|c| {
            if let Some(i) = MACRONS.iter().position(|&m| m == c) {
                PLAIN[i]
            } else if let Some(i) = MACRONS_UPPER.iter().position(|&m| m == c) {
                PLAIN_UPPER[i]
            } else {
                c
            }
        })
        .collect()
}

/// Per-vowel macron counts (case-folded), indexed like [`MACRONS`].
pub fn macron_histogram(s: &str) -> [usize; 5] {
    let mut out = [0usize; 5];
    for c in s.chars().map(fold_macron) {
        if let Some(i) = MACRONS.iter().position(|&m| m == c) {
            out[i] += 1;
        }
    }
    out
}
