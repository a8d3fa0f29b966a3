//! Upstream Manager: configured upstream registries and the route matcher
//! that selects one for a given repository path.

mod manager;
mod router;

pub use manager::UpstreamManager;
pub use router::{RouteMatch, RouteMatcher};
