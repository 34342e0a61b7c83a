//! VIN enrichment: batch decode, then safety, recall and complaint lookups
//! shared across every vin of the same model.

pub mod engine;
pub mod fields;
pub mod gate;
pub mod lookup;
pub mod nhtsa;

pub use engine::{EnrichReport, EnrichmentEngine};
pub use fields::{EnrichmentFields, ModelKey};
pub use lookup::{LookupError, VehicleLookup};
pub use nhtsa::NhtsaClient;
