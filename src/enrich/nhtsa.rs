//! `VehicleLookup` over the public NHTSA services: vPIC batch decode, NCAP
//! safety ratings, recalls and complaints.
//!
//! Response parsing is kept apart from the HTTP calls so it can be tested
//! against captured payloads.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::fields::ModelKey;
use super::lookup::{
    Complaint, DecodedVehicle, LookupError, RatedVariant, Recall, SafetyRating, VehicleLookup,
};

pub const VPIC_BASE_URL: &str = "https://vpic.nhtsa.dot.gov/api/vehicles";
pub const API_BASE_URL: &str = "https://api.nhtsa.gov";

pub struct NhtsaClient {
    client: Client,
    vpic_base: String,
    api_base: String,
}

impl NhtsaClient {
    pub fn new(timeout: Duration) -> Result<Self, LookupError> {
        Self::with_base_urls(VPIC_BASE_URL, API_BASE_URL, timeout)
    }

    pub fn with_base_urls(vpic_base: &str, api_base: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lotwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;

        Ok(NhtsaClient {
            client,
            vpic_base: vpic_base.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, base: &str, segments: &[&str]) -> Result<Url, LookupError> {
        let mut url = Url::parse(base).map_err(|e| LookupError::Malformed(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| LookupError::Malformed(format!("{base}: not a base url")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn model_query(key: &ModelKey) -> [(&'static str, String); 3] {
        [
            ("make", key.make.clone()),
            ("model", key.model.clone()),
            ("modelYear", key.model_year.to_string()),
        ]
    }
}

fn transport(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout(e.to_string())
    } else {
        LookupError::Transport(e.to_string())
    }
}

fn body(response: Response) -> Result<String, LookupError> {
    let status = response.status();
    if !status.is_success() {
        return Err(LookupError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    response.text().map_err(transport)
}

impl VehicleLookup for NhtsaClient {
    fn decode_batch(&self, vins: &[String]) -> Result<Vec<DecodedVehicle>, LookupError> {
        let url = self.url(&self.vpic_base, &["DecodeVINValuesBatch", ""])?;
        let data = vins.join(";");
        debug!(vins = vins.len(), "decode request");

        let response = self
            .client
            .post(url)
            .form(&[("format", "json"), ("data", data.as_str())])
            .send()
            .map_err(transport)?;

        parse_decode(&body(response)?)
    }

    fn rated_variants(&self, key: &ModelKey) -> Result<Vec<RatedVariant>, LookupError> {
        let year = key.model_year.to_string();
        let url = self.url(
            &self.api_base,
            &["SafetyRatings", "modelyear", &year, "make", &key.make, "model", &key.model],
        )?;

        let response = self.client.get(url).send().map_err(transport)?;
        parse_variants(&body(response)?)
    }

    fn safety_rating(&self, vehicle_id: i64) -> Result<Option<SafetyRating>, LookupError> {
        let id = vehicle_id.to_string();
        let url = self.url(&self.api_base, &["SafetyRatings", "VehicleId", &id])?;

        let response = self.client.get(url).send().map_err(transport)?;
        parse_rating(&body(response)?)
    }

    fn recalls(&self, key: &ModelKey) -> Result<Vec<Recall>, LookupError> {
        let url = self.url(&self.api_base, &["recalls", "recallsByVehicle"])?;

        let response = self
            .client
            .get(url)
            .query(&Self::model_query(key))
            .send()
            .map_err(transport)?;
        parse_recalls(&body(response)?)
    }

    fn complaints(&self, key: &ModelKey) -> Result<Vec<Complaint>, LookupError> {
        let url = self.url(&self.api_base, &["complaints", "complaintsByVehicle"])?;

        let response = self
            .client
            .get(url)
            .query(&Self::model_query(key))
            .send()
            .map_err(transport)?;
        parse_complaints(&body(response)?)
    }
}

// vPIC capitalizes `Results`, the newer api.nhtsa.gov endpoints do not
#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(alias = "Results", default = "Vec::new")]
    results: Vec<T>,
}

fn envelope<'a, T: Deserialize<'a>>(body: &'a str) -> Result<Vec<T>, LookupError> {
    let parsed: Envelope<T> =
        serde_json::from_str(body).map_err(|e| LookupError::Malformed(e.to_string()))?;
    Ok(parsed.results)
}

/// Non-empty text of a decoder value. vPIC sends everything as strings and
/// uses "" for unknown.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_decode(body: &str) -> Result<Vec<DecodedVehicle>, LookupError> {
    let results: Vec<BTreeMap<String, Value>> = envelope(body)?;

    Ok(results
        .into_iter()
        .filter_map(|record| {
            let fields: BTreeMap<String, String> = record
                .iter()
                .filter_map(|(name, value)| text(value).map(|v| (name.clone(), v)))
                .collect();

            let vin = fields.get("VIN")?.to_uppercase();
            Some(DecodedVehicle {
                vin,
                make: fields.get("Make").cloned(),
                model: fields.get("Model").cloned(),
                model_year: fields.get("ModelYear").cloned(),
                fields,
            })
        })
        .collect())
}

#[derive(Deserialize)]
struct VariantRecord {
    #[serde(rename = "VehicleId")]
    vehicle_id: i64,
    #[serde(rename = "VehicleDescription", default)]
    description: String,
}

pub fn parse_variants(body: &str) -> Result<Vec<RatedVariant>, LookupError> {
    let records: Vec<VariantRecord> = envelope(body)?;
    Ok(records
        .into_iter()
        .map(|r| RatedVariant {
            vehicle_id: r.vehicle_id,
            description: r.description,
        })
        .collect())
}

#[derive(Deserialize)]
struct RatingRecord {
    #[serde(rename = "OverallRating")]
    overall: Option<String>,
    #[serde(rename = "OverallFrontCrashRating")]
    front_crash: Option<String>,
    #[serde(rename = "OverallSideCrashRating")]
    side_crash: Option<String>,
    #[serde(rename = "RolloverRating")]
    rollover: Option<String>,
}

pub fn parse_rating(body: &str) -> Result<Option<SafetyRating>, LookupError> {
    let records: Vec<RatingRecord> = envelope(body)?;
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    Ok(records.into_iter().next().map(|r| SafetyRating {
        overall: clean(r.overall),
        front_crash: clean(r.front_crash),
        side_crash: clean(r.side_crash),
        rollover: clean(r.rollover),
    }))
}

#[derive(Deserialize)]
struct RecallRecord {
    #[serde(rename = "NHTSACampaignNumber")]
    campaign: Option<String>,
    #[serde(rename = "Component")]
    component: Option<String>,
    #[serde(rename = "ReportReceivedDate")]
    report_date: Option<String>,
}

pub fn parse_recalls(body: &str) -> Result<Vec<Recall>, LookupError> {
    let records: Vec<RecallRecord> = envelope(body)?;
    Ok(records
        .into_iter()
        .map(|r| Recall {
            campaign: r.campaign,
            component: r.component,
            report_date: r.report_date,
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComplaintRecord {
    components: Option<String>,
    #[serde(default)]
    number_of_injuries: u32,
    #[serde(default)]
    number_of_deaths: u32,
    #[serde(default)]
    crash: bool,
    #[serde(default)]
    fire: bool,
}

pub fn parse_complaints(body: &str) -> Result<Vec<Complaint>, LookupError> {
    let records: Vec<ComplaintRecord> = envelope(body)?;
    Ok(records
        .into_iter()
        .map(|r| Complaint {
            components: r.components,
            injuries: r.number_of_injuries,
            deaths: r.number_of_deaths,
            crash: r.crash,
            fire: r.fire,
        })
        .collect())
}
