//! Donor profiles.
//!
//! A [`DonorProfile`] is the canonical in-memory description of a device to
//! be cloned: identity, raw config space, parsed capabilities, BAR layout,
//! MSI-X geometry, optional behavioral statistics and provenance. Profiles
//! are immutable once assembled; the on-disk form ([`schema::ProfileDocument`])
//! round-trips losslessly, unknown JSON keys included.

pub mod behavior;
pub mod error;
pub mod extract;
pub mod profile;
pub mod schema;
pub mod store;

pub use behavior::{BehaviorProfile, BehaviorProfiler, CancelToken, LatencyHistogram};
pub use error::ProfileError;
pub use extract::{extract_profile, ExtractionOptions};
pub use profile::{DonorIdentity, DonorProfile, Provenance, GENERATOR_VERSION};
pub use schema::ProfileDocument;
pub use store::ProfileStore;
