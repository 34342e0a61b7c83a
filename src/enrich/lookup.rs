//! Seam between the enrichment engine and the external vehicle services.
//!
//! Each trait method corresponds to exactly one outbound request, so the
//! engine can put every call through the shared rate limit. Absence of
//! results is `Ok(vec![])`, never an error.

use std::collections::BTreeMap;

use thiserror::Error;

use super::fields::ModelKey;

/// Largest batch the decode service accepts in one request.
pub const MAX_DECODE_BATCH: usize = 50;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned status {status}: {url}")]
    Status { status: u16, url: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One record from the batch decoder. Only non-empty decoder fields are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedVehicle {
    pub vin: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub model_year: Option<String>,
    pub fields: BTreeMap<String, String>,
}

/// A rated variant of a model (trim/body combination) from the safety service.
#[derive(Debug, Clone, PartialEq)]
pub struct RatedVariant {
    pub vehicle_id: i64,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyRating {
    pub overall: Option<String>,
    pub front_crash: Option<String>,
    pub side_crash: Option<String>,
    pub rollover: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recall {
    pub campaign: Option<String>,
    pub component: Option<String>,
    pub report_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Complaint {
    pub components: Option<String>,
    pub injuries: u32,
    pub deaths: u32,
    pub crash: bool,
    pub fire: bool,
}

pub trait VehicleLookup: Send + Sync {
    /// Decode up to `MAX_DECODE_BATCH` vins. Vins the service cannot resolve
    /// are simply missing from the result.
    fn decode_batch(&self, vins: &[String]) -> Result<Vec<DecodedVehicle>, LookupError>;

    fn rated_variants(&self, key: &ModelKey) -> Result<Vec<RatedVariant>, LookupError>;

    fn safety_rating(&self, vehicle_id: i64) -> Result<Option<SafetyRating>, LookupError>;

    fn recalls(&self, key: &ModelKey) -> Result<Vec<Recall>, LookupError>;

    fn complaints(&self, key: &ModelKey) -> Result<Vec<Complaint>, LookupError>;
}
