//! Small async building blocks shared by the tanko crates.
//!
//! - [`Published`]: a replay-latest observable cell (one writer, any number
//!   of observers).
//! - [`SingleFlight`]: cancel-and-await supervision so that at most one
//!   operation of a kind is in flight per owner.

mod flight;
mod published;

pub use crate::flight::{FlightGuard, SingleFlight};
pub use crate::published::Published;
