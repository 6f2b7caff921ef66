//! Text normalization and title matching shared by the indexer client, the
//! P2P engine and webhook correlation.

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Minimum ratio between the shorter and the longer normalized title for a
/// containment match to be accepted.
pub const CONTAINMENT_MIN_RATIO: f64 = 0.6;

lazy_static! {
    static ref BRACKETED_GROUP: Regex = Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").unwrap();
    static ref DASH_EDITION_SUFFIX: Regex = Regex::new(
        r"(?i)\s+-\s+[^-]*(remaster|deluxe|edition|version|anniversary|expanded|mono|stereo|bonus)[^-]*$"
    )
    .unwrap();
    static ref ROMAN_NUMERAL: Regex =
        Regex::new(r"^(i{1,3}|iv|v|vi{1,3}|ix|x|xi{1,3}|xiv|xv)$").unwrap();
}

const SEQUEL_WORDS: &[&str] = &["part", "pt", "vol", "volume", "chapter", "episode"];

const STOP_WORDS: &[&str] = &["the", "and", "of", "a", "an", "in", "on", "to", "for"];

/// Strips diacritics by decomposing and dropping combining marks.
pub fn strip_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lowercases, strips diacritics, maps punctuation to spaces and collapses
/// whitespace. Used for artist names and canonical artist/album keys.
pub fn normalize_name(s: &str) -> String {
    let folded = strip_diacritics(s).to_lowercase().replace('&', " and ");
    folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalizes an album title: edition, remaster and disc annotations in
/// parentheses, brackets or braces are removed, as are dash-separated edition
/// suffixes, before [`normalize_name`] is applied.
pub fn normalize_album_title(title: &str) -> String {
    let without_groups = BRACKETED_GROUP.replace_all(title, " ");
    let without_suffix = DASH_EDITION_SUFFIX.replace(without_groups.trim(), "");
    let normalized = normalize_name(&without_suffix);
    if normalized.is_empty() {
        // Titles made only of bracketed text keep their content.
        normalize_name(title)
    } else {
        normalized
    }
}

fn is_sequel_marker(word: &str) -> bool {
    SEQUEL_WORDS.contains(&word)
        || ROMAN_NUMERAL.is_match(word)
        || word.chars().all(|c| c.is_ascii_digit())
}

/// Strict album title comparison.
///
/// Titles match when their normalized forms are equal, or when one contains
/// the other, the shorter is at least [`CONTAINMENT_MIN_RATIO`] of the longer
/// and the leftover words carry no sequel marker ("II", "2", "Part", "Vol").
pub fn titles_match_strictly(a: &str, b: &str) -> bool {
    let a = normalize_album_title(a);
    let b = normalize_album_title(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let padded_longer = format!(" {} ", longer);
    let padded_shorter = format!(" {} ", shorter);
    let Some(pos) = padded_longer.find(&padded_shorter) else {
        return false;
    };

    let ratio = shorter.chars().count() as f64 / longer.chars().count() as f64;
    if ratio < CONTAINMENT_MIN_RATIO {
        return false;
    }

    let remainder = format!(
        "{} {}",
        &padded_longer[..pos],
        &padded_longer[pos + padded_shorter.len()..]
    );
    !remainder.split_whitespace().any(is_sequel_marker)
}

/// Lenient containment used by the last-resort correlation scan: either side
/// may contain the other after normalization.
pub fn loosely_contains(haystack: &str, needle: &str) -> bool {
    let haystack = normalize_name(haystack);
    let needle = normalize_name(needle);
    if haystack.is_empty() || needle.is_empty() {
        return false;
    }
    haystack.contains(&needle) || needle.contains(&haystack)
}

/// Canonical key identifying a logical album, shared by duplicate jobs.
pub fn canonical_key(artist: &str, album: &str) -> String {
    format!("{}|{}", normalize_name(artist), normalize_album_title(album))
}

/// Significant words of a title, used to validate cached P2P results and to
/// score filename matches.
pub fn key_words(title: &str) -> Vec<String> {
    normalize_album_title(title)
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Splits a display subject of the form "Artist - Album".
pub fn parse_subject(subject: &str) -> Option<(String, String)> {
    let (artist, album) = subject.split_once(" - ")?;
    let (artist, album) = (artist.trim(), album.trim());
    if artist.is_empty() || album.is_empty() {
        return None;
    }
    Some((artist.to_string(), album.to_string()))
}
