//! Status reconciliation and change detection.

mod changes;
mod reconcile;

pub use changes::*;
pub use reconcile::*;
