//! Supported FPGA boards and their upstream constraint sources.

pub mod cache;
pub mod catalog;
pub mod error;

pub use cache::{MirrorFetcher, RepoCache, UpstreamFetcher, DEFAULT_FETCH_TIMEOUT};
pub use catalog::{board, boards, BoardDescriptor, IpFamily};
pub use error::BoardError;
