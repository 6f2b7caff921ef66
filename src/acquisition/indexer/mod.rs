//! Indexer provider integration: typed HTTP API and acquisition logic.

mod api;
mod client;
mod types;

pub use api::{parse_records, HttpIndexerApi, IndexerApi};
pub use client::{
    best_scored_artist, score_artist, select_artist_for_add, AddAlbumOutcome, AlbumRequest,
    IndexedAlbum, IndexerClient,
};
pub use types::*;
