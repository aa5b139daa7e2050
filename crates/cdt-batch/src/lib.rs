pub mod job;
pub mod manifest;
pub mod runner;

pub use job::{CellJobRecord, JobStatus};
pub use manifest::{load_batch_manifest, write_batch_manifest, BatchManifest, MANIFEST_FILE};
pub use runner::{run_batch, BatchRunnerConfig, BatchSummary};
