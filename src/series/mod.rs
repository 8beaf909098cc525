//! Everything that happens to a partial series after extraction.
//!
//! manual overrides → [`fill`] → [`reshape`] produce a region's partial
//! document; [`reconcile`] later merges national values into it.

pub mod fill;
pub mod overrides;
pub mod reconcile;
pub mod reshape;

pub use fill::fill;
pub use overrides::ManualTable;
pub use reconcile::{national_only, reconcile, RECONCILED_METRICS};
pub use reshape::reshape;
