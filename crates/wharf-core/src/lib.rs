//! Wharf Cache core business logic: content-addressed storage, the
//! vulnerability scan gate, and the proxy cache that ties them to
//! configured upstream registries.

pub mod chart;
pub mod digest;
pub mod error;
pub mod eviction;
pub mod journal;
pub mod manifest;
pub mod proxy_cache;
pub mod registry;
pub mod scan;
pub mod upstream;

pub use chart::{ChartIndex, ChartIndexEntry, ChartStore, HELM_CHART_MEDIA_TYPE};
pub use error::CoreError;
pub use eviction::EvictionEngine;
pub use journal::{CachedImageEntry, Journal, JournalState, ScanDecision, ScanResult, ScanStatus};
pub use manifest::{ManifestEntry, ManifestIndex};
pub use proxy_cache::{ProxyCache, PulledManifest};
pub use registry::RegistryService;
pub use scan::{AdmitPendingPolicy, Decision, ScanGate, ScanGatePolicy, ScanSummary};
pub use upstream::{RouteMatch, RouteMatcher, UpstreamManager};
