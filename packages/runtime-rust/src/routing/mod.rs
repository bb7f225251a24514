//! Fan-out/fan-in routing.
//!
//! - [`Route`]: the processor a pair is dispatched to
//! - [`RoutingPair`]: one (route, message) unit with its sequence
//! - [`ForkJoinStrategy`]: bounded concurrent execution, deadline, merge
//! - [`ResultMerger`]: `CollectList`, `CollectMap`, `Concat`, closures

pub mod config;
pub mod error;
pub mod fork_join;
pub mod merger;
pub mod outcome;
pub mod pair;
pub mod route;

pub use config::ForkJoinConfig;
pub use error::{CompositeRoutingError, ForkJoinError};
pub use fork_join::ForkJoinStrategy;
pub use merger::{CollectList, CollectMap, Concat, MergeError, ResultMerger};
pub use outcome::{RouteFailure, RouteOutcome};
pub use pair::RoutingPair;
pub use route::{route_fn, FnRoute, Route, RouteError};
