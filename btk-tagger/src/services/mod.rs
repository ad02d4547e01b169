//! Services for provider call control and media discovery
//!
//! - `retry`: fixed-ceiling retry combinator
//! - `rate_budget`: session-wide budget and disable flags
//! - `pacer`: per-host request pacing
//! - `controller`: the wrapper every provider call goes through
//! - `media_scanner`: image/video discovery and post-upload cleanup
//! - `image_prep`: JPEG conversion and downscaling

pub mod controller;
pub mod image_prep;
pub mod media_scanner;
pub mod pacer;
pub mod rate_budget;
pub mod retry;

pub use controller::{CallOutcome, ControlledResponse, ProviderController};
pub use image_prep::{prepare_upload, shrink_for_search, ImagePrepError, ImagePrepOptions, PreparedImage};
pub use media_scanner::{cleanup_dirs, detect_extension, remove_uploaded, MediaScanner, ScanError};
pub use pacer::RequestPacer;
pub use rate_budget::{BudgetDecision, DisableReason, SessionState};
pub use retry::{with_retry, RetryPolicy};
