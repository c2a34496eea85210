// InfoExtractor module - video info extraction
//
// The CLI extractor runs the bundled yt-dlp compatible binary once per call;
// retries, proxying and categorization live in the orchestrator.

mod cli;
mod traits;

pub use cli::CliInfoExtractor;
pub use traits::{ExtractorConfig, InfoExtractor};
