//! P2P network acquisition: search, ranking and download of single tracks.

mod engine;
mod network;
mod query;
mod ranking;

pub use engine::{DownloadedTrack, P2pEngine, TrackRequest};
pub use network::{ByteStream, HttpP2pGateway, P2pNetwork, SearchResponse, SharedFile};
pub use query::{clean_title, primary_artist, query_variants};
pub use ranking::{
    apply_reputation, quality_tier, rank_candidates, score_file, QualityTier, RankingTarget,
    TrackMatch,
};
