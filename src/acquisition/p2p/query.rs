//! Search query variants for the P2P network.
//!
//! Peers index plain filenames, so queries avoid punctuation and edition
//! annotations. Variants go from most to least specific.

use crate::acquisition::matching::strip_diacritics;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").unwrap();
    static ref FEATURING: Regex =
        Regex::new(r"(?i)(\s+(feat\.?|ft\.?|featuring|&)\s+|\s*,\s*).*$").unwrap();
    static ref TRACK_VERSION_SUFFIX: Regex = Regex::new(
        r"(?i)\s+-\s+[^-]*\b(remaster\w*|deluxe|edition|version|anniversary|expanded|mono|stereo|bonus|live|demo|edit)\b[^-]*$"
    )
    .unwrap();
    static ref QUERY_NOISE: Regex = Regex::new(r#"[^\p{L}\p{N}\s']"#).unwrap();
}

const SHORT_TITLE_WORDS: usize = 3;

/// First credited artist: "A feat. B" and "A & B" both give "A".
pub fn primary_artist(artist: &str) -> String {
    let primary = FEATURING.replace(artist.trim(), "");
    if primary.trim().is_empty() {
        artist.trim().to_string()
    } else {
        primary.trim().to_string()
    }
}

/// Title without bracketed annotations, "- Live" style version suffixes and
/// punctuation.
pub fn clean_title(title: &str) -> String {
    let without_groups = BRACKETED.replace_all(title, " ");
    let without_suffix = TRACK_VERSION_SUFFIX.replace(without_groups.trim(), "");
    let cleaned = collapse(&QUERY_NOISE.replace_all(&without_suffix, " "));
    if cleaned.is_empty() {
        collapse(&QUERY_NOISE.replace_all(&without_groups, " "))
    } else {
        cleaned
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Query variants in the order they should be tried, without duplicates.
pub fn query_variants(artist: &str, title: &str) -> Vec<String> {
    let artist = collapse(&QUERY_NOISE.replace_all(&primary_artist(artist), " "));
    let title = clean_title(title);

    let mut variants = Vec::new();
    let mut push = |query: String| {
        let query = collapse(&query);
        if !query.is_empty() && !variants.contains(&query) {
            variants.push(query);
        }
    };

    push(format!("{} {}", artist, title));

    let short_title: Vec<&str> = title.split_whitespace().take(SHORT_TITLE_WORDS).collect();
    if short_title.len() < title.split_whitespace().count() {
        push(format!("{} {}", artist, short_title.join(" ")));
    }

    push(strip_diacritics(&format!("{} {}", artist, title)));
    push(title.clone());

    variants
}
