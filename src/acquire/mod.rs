//! Listing acquisition: drives the aggregator page until every sub-source is
//! exhausted and turns captured responses into rows.

pub mod driver;
pub mod extract;
pub mod monitor;
pub mod replay;
pub mod retry;
pub mod surface;

pub use driver::{AcquireReport, DriverState, SourceConvergenceDriver};
pub use replay::ReplaySurface;
pub use surface::{RenderingSurface, SubSource, SurfaceError};
