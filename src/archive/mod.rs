mod extract;
mod fetch;
mod service;

pub use extract::{extract, sniff_format, ArchiveFormat, ExtractOutcome, Layout};
pub use fetch::{parse_remote_id, DriveFetcher, FetchOutcome};
pub use service::{ingest, IngestFlow, IngestOutcome, IngestPlan};
