pub mod client;
pub mod fetcher;
pub mod pool;

pub use client::{EvergreenApi, EvergreenClient};
pub use fetcher::{DistroCostFetcher, FetchError, ProjectCostFetcher};
