//! Candidate scoring for P2P search results.

use super::network::{SearchResponse, SharedFile};
use crate::acquisition::matching::{key_words, normalize_name};
use crate::acquisition::reputation::{ReputationTracker, ReputationVerdict};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const FREE_SLOT_BONUS: i32 = 40;
const NO_SLOT_PENALTY: i32 = -40;
const ARTIST_FULL_BONUS: i32 = 30;
const ARTIST_PARTIAL_BONUS: i32 = 15;
const TITLE_FULL_BONUS: i32 = 50;
const TITLE_PARTIAL_BONUS: i32 = 25;
/// Larger than every bonus combined, so a file without any title word never
/// outranks one that has some.
const NO_TITLE_PENALTY: i32 = -200;
const LOSSLESS_BONUS: i32 = 30;
const BITRATE_320_BONUS: i32 = 20;
const BITRATE_256_BONUS: i32 = 10;
const PLAUSIBLE_SIZE_BONUS: i32 = 10;
const SPEED_FAST_BONUS: i32 = 15;
const SPEED_MEDIUM_BONUS: i32 = 8;
const SPEED_SLOW_BONUS: i32 = 3;

const MAX_PLAUSIBLE_TRACK_BYTES: u64 = 250 * 1024 * 1024;

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "ogg", "opus", "wav", "aac", "alac", "ape", "wma", "aiff",
];
const LOSSLESS_EXTENSIONS: &[&str] = &["flac", "alac", "wav", "ape", "aiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Lossless,
    High,
    Standard,
    Unknown,
}

/// A ranked search candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMatch {
    pub peer: String,
    pub path: String,
    pub size: u64,
    pub bit_rate: Option<u32>,
    pub quality: QualityTier,
    pub score: i32,
}

impl TrackMatch {
    /// File name without the peer's directories.
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(self.path.as_str())
    }
}

/// What a candidate is ranked against.
#[derive(Debug, Clone)]
pub struct RankingTarget<'a> {
    pub artist: &'a str,
    pub title: &'a str,
    pub expected_size: Option<u64>,
    pub min_file_size: u64,
    pub size_tolerance: f64,
}

pub(super) fn extension(path: &str) -> Option<String> {
    let name = path.rsplit(['\\', '/']).next()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

pub fn quality_tier(path: &str, bit_rate: Option<u32>) -> QualityTier {
    match extension(path) {
        Some(ext) if LOSSLESS_EXTENSIONS.contains(&ext.as_str()) => QualityTier::Lossless,
        _ => match bit_rate {
            Some(rate) if rate >= 256 => QualityTier::High,
            Some(_) => QualityTier::Standard,
            None => QualityTier::Unknown,
        },
    }
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    !phrase.is_empty() && format!(" {} ", haystack).contains(&format!(" {} ", phrase))
}

fn title_words(title: &str) -> Vec<String> {
    let words = key_words(title);
    if words.is_empty() {
        normalize_name(title)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    } else {
        words
    }
}

fn size_is_plausible(size: u64, target: &RankingTarget) -> bool {
    match target.expected_size {
        Some(expected) if expected > 0 => {
            let diff = (size as f64 - expected as f64).abs() / expected as f64;
            diff <= target.size_tolerance
        }
        _ => size >= target.min_file_size && size <= MAX_PLAUSIBLE_TRACK_BYTES,
    }
}

pub fn score_file(response: &SearchResponse, file: &SharedFile, target: &RankingTarget) -> i32 {
    let mut score = if response.has_free_slot {
        FREE_SLOT_BONUS
    } else {
        NO_SLOT_PENALTY
    };

    let haystack = normalize_name(&file.filename);
    let haystack_words: Vec<&str> = haystack.split_whitespace().collect();

    let artist = normalize_name(target.artist);
    if contains_phrase(&haystack, &artist) {
        score += ARTIST_FULL_BONUS;
    } else if artist
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .any(|w| haystack_words.contains(&w))
    {
        score += ARTIST_PARTIAL_BONUS;
    }

    let words = title_words(target.title);
    let present = words
        .iter()
        .filter(|w| haystack_words.contains(&w.as_str()))
        .count();
    score += if !words.is_empty() && present == words.len() {
        TITLE_FULL_BONUS
    } else if present > 0 {
        TITLE_PARTIAL_BONUS
    } else {
        NO_TITLE_PENALTY
    };

    if quality_tier(&file.filename, file.bit_rate) == QualityTier::Lossless {
        score += LOSSLESS_BONUS;
    }
    match file.bit_rate {
        Some(rate) if rate >= 320 => score += BITRATE_320_BONUS,
        Some(rate) if rate >= 256 => score += BITRATE_256_BONUS,
        _ => {}
    }

    if size_is_plausible(file.size, target) {
        score += PLAUSIBLE_SIZE_BONUS;
    }

    score += match response.upload_speed {
        s if s >= 1024 * 1024 => SPEED_FAST_BONUS,
        s if s >= 256 * 1024 => SPEED_MEDIUM_BONUS,
        s if s >= 64 * 1024 => SPEED_SLOW_BONUS,
        _ => 0,
    };
    score
}

/// Score every audio file of every response, drop those under `min_score`
/// and keep the best `max_candidates`, best first.
pub fn rank_candidates(
    responses: &[SearchResponse],
    target: &RankingTarget,
    min_score: i32,
    max_candidates: usize,
) -> Vec<TrackMatch> {
    let mut matches: Vec<TrackMatch> = responses
        .iter()
        .flat_map(|response| {
            response
                .files
                .iter()
                .filter(|file| {
                    extension(&file.filename)
                        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
                })
                .map(move |file| TrackMatch {
                    peer: response.peer.clone(),
                    path: file.filename.clone(),
                    size: file.size,
                    bit_rate: file.bit_rate,
                    quality: quality_tier(&file.filename, file.bit_rate),
                    score: score_file(response, file, target),
                })
        })
        .filter(|m| m.score >= min_score)
        .collect();

    // Stable: equal scores keep the network's order.
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches.truncate(max_candidates);
    matches
}

/// Subtract reputation penalties, drop peers over the skip threshold and
/// re-sort.
pub async fn apply_reputation(
    matches: Vec<TrackMatch>,
    reputation: &ReputationTracker,
) -> Vec<TrackMatch> {
    let mut verdicts: HashMap<String, ReputationVerdict> = HashMap::new();
    let mut kept = Vec::with_capacity(matches.len());
    for mut candidate in matches {
        let verdict = match verdicts.get(&candidate.peer) {
            Some(verdict) => *verdict,
            None => {
                let verdict = reputation.verdict_for(&candidate.peer).await;
                verdicts.insert(candidate.peer.clone(), verdict);
                verdict
            }
        };
        match verdict {
            ReputationVerdict::Skip => continue,
            ReputationVerdict::Penalty(penalty) => {
                candidate.score -= penalty;
                kept.push(candidate);
            }
        }
    }
    kept.sort_by(|a, b| b.score.cmp(&a.score));
    kept
}
