//! Async HTTP clients for the two ends of a CMS-to-catalog sync.
//!
//! - [`SourceClient`] reads items and CSV exports from a headless CMS.
//! - [`CatalogClient`] drives a CKAN-style action API: datasets,
//!   resources, uploads and the post-ingest trigger.
//!
//! Both share a [`TransportConfig`] (timeout + [`RetryPolicy`]) and
//! retry only timeouts and connection failures.

pub mod catalog;
pub mod error;
pub mod retry;
pub mod source;
pub mod transport;

pub use catalog::{
    ActionMethod, CatalogClient, Dataset, DatasetInfo, DatasetSummary, Published, Resource, ResourceUpdate,
    ResourceUpload, Tag,
};
pub use error::{CatalogError, SourceError};
pub use retry::RetryPolicy;
pub use source::{ItemsPage, Record, SourceClient};
pub use transport::TransportConfig;
