//! Smart order routing over a pool snapshot.
//!
//! Discovers candidate paths ([`catalog`]), linearizes their price curves
//! and splits the requested volume at the optimal marginal price
//! ([`breakpoints`]), then validates each split with exact pool math and
//! gas costs ([`optimizer`]). Pure and synchronous: callers refresh pool
//! state and settle the returned [`Allocation`] themselves.

pub mod breakpoints;
pub mod catalog;
pub mod error;
pub mod optimizer;
pub mod path;

pub use error::RouterError;
pub use optimizer::{find_best_allocation, Allocation, Route};
pub use path::{Leg, Path};
