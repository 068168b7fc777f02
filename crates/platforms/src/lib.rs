//! Ads platform integration layer — entity reads and mutations per platform.

pub mod clients;
pub mod router;

pub use clients::{AdsPlatform, MutationOutcome, PlatformError, PlatformResponse, SimulatedAdsClient};
pub use router::PlatformRouter;
