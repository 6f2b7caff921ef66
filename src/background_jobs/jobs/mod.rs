//! Specific background job implementations.

pub mod cache_prune;
pub mod indexer_reconciliation;
pub mod stale_job_reaper;

pub use cache_prune::CachePruneJob;
pub use indexer_reconciliation::IndexerReconciliationJob;
pub use stale_job_reaper::StaleJobReaperJob;
