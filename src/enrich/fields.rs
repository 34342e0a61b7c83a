//! Typed enrichment record and the per-model summaries merged into it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::lookup::{Complaint, DecodedVehicle, Recall, SafetyRating};

/// Composite key shared by every vin of the same model year, make and model.
/// Auxiliary lookups are keyed (and cached) by this, not by vin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub model_year: u16,
    pub make: String,
    pub model: String,
}

impl ModelKey {
    /// Builds a key when all three parts resolve. Make and model are
    /// upper-cased so spelling variants from the decoder coalesce.
    pub fn new(model_year: &str, make: &str, model: &str) -> Option<Self> {
        let model_year: u16 = model_year.trim().parse().ok()?;
        let make = make.trim().to_uppercase();
        let model = model.trim().to_uppercase();

        if model_year < 1900 || make.is_empty() || model.is_empty() {
            return None;
        }

        Some(ModelKey { model_year, make, model })
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.model_year, self.make, self.model)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetySummary {
    pub ratings_count: u32,
    pub overall_rating: Option<String>,
    pub front_crash_rating: Option<String>,
    pub side_crash_rating: Option<String>,
    pub rollover_rating: Option<String>,
}

impl SafetySummary {
    /// `variants` is the number of rated variants for the model; `rating`
    /// is the detail of the first one, when it could be fetched.
    pub fn from_ratings(variants: usize, rating: Option<&SafetyRating>) -> Self {
        SafetySummary {
            ratings_count: u32::try_from(variants).unwrap_or(u32::MAX),
            overall_rating: rating.and_then(|r| r.overall.clone()),
            front_crash_rating: rating.and_then(|r| r.front_crash.clone()),
            side_crash_rating: rating.and_then(|r| r.side_crash.clone()),
            rollover_rating: rating.and_then(|r| r.rollover.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallSummary {
    pub total_recalls: u32,
    pub recall_components: Option<String>,
    pub latest_recall_date: Option<NaiveDate>,
}

impl RecallSummary {
    pub fn from_recalls(recalls: &[Recall]) -> Self {
        let components: BTreeSet<&str> = recalls
            .iter()
            .filter_map(|r| r.component.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        let latest = recalls
            .iter()
            .filter_map(|r| r.report_date.as_deref().and_then(parse_report_date))
            .max();

        RecallSummary {
            total_recalls: u32::try_from(recalls.len()).unwrap_or(u32::MAX),
            recall_components: join_non_empty(components.into_iter(), "; "),
            latest_recall_date: latest,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplaintSummary {
    pub total_complaints: u32,
    pub injuries: u32,
    pub deaths: u32,
    pub crash_related: u32,
    pub fire_related: u32,
    pub common_areas: Option<String>,
}

/// How many component areas to keep in `common_areas`.
const COMMON_AREAS: usize = 3;

impl ComplaintSummary {
    pub fn from_complaints(complaints: &[Complaint]) -> Self {
        let mut summary = ComplaintSummary {
            total_complaints: u32::try_from(complaints.len()).unwrap_or(u32::MAX),
            ..ComplaintSummary::default()
        };

        let mut areas: HashMap<&str, u32> = HashMap::new();
        for complaint in complaints {
            summary.injuries = summary.injuries.saturating_add(complaint.injuries);
            summary.deaths = summary.deaths.saturating_add(complaint.deaths);
            summary.crash_related += u32::from(complaint.crash);
            summary.fire_related += u32::from(complaint.fire);

            // a complaint can name several comma-separated components
            if let Some(components) = complaint.components.as_deref() {
                for area in components.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                    *areas.entry(area).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, u32)> = areas.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        summary.common_areas = join_non_empty(
            ranked.into_iter().take(COMMON_AREAS).map(|(area, _)| area),
            ", ",
        );

        summary
    }
}

/// Result of one auxiliary lookup, summarized and ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Auxiliary {
    Safety(SafetySummary),
    Recalls(RecallSummary),
    Complaints(ComplaintSummary),
}

/// Everything known about a vin from the external services.
///
/// An all-`None` record is meaningful: it marks the vin as processed so it
/// leaves the backlog even though the services had nothing for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentFields {
    pub make: Option<String>,
    pub model: Option<String>,
    pub model_year: Option<String>,
    pub trim: Option<String>,
    pub series: Option<String>,
    pub body_class: Option<String>,
    pub vehicle_type: Option<String>,
    pub drive_type: Option<String>,
    pub fuel_type_primary: Option<String>,
    pub engine_cylinders: Option<String>,
    pub displacement_l: Option<String>,
    pub engine_hp: Option<String>,
    pub transmission_style: Option<String>,
    pub transmission_speeds: Option<String>,
    pub doors: Option<String>,
    pub manufacturer: Option<String>,
    pub plant_country: Option<String>,
    pub error_code: Option<String>,

    pub safety: Option<SafetySummary>,
    pub recalls: Option<RecallSummary>,
    pub complaints: Option<ComplaintSummary>,

    /// Decoder fields without a dedicated column, kept for forward compatibility.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

// decoder field names that map onto typed columns
const MAPPED: &[&str] = &[
    "VIN", "Make", "Model", "ModelYear", "Trim", "Series", "BodyClass", "VehicleType",
    "DriveType", "FuelTypePrimary", "EngineCylinders", "DisplacementL", "EngineHP",
    "TransmissionStyle", "TransmissionSpeeds", "Doors", "Manufacturer", "PlantCountry",
    "ErrorCode",
];

impl EnrichmentFields {
    pub fn from_decoded(decoded: &DecodedVehicle) -> Self {
        let get = |name: &str| decoded.fields.get(name).cloned();

        let extra = decoded
            .fields
            .iter()
            .filter(|(name, _)| !MAPPED.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        EnrichmentFields {
            make: decoded.make.clone(),
            model: decoded.model.clone(),
            model_year: decoded.model_year.clone(),
            trim: get("Trim"),
            series: get("Series"),
            body_class: get("BodyClass"),
            vehicle_type: get("VehicleType"),
            drive_type: get("DriveType"),
            fuel_type_primary: get("FuelTypePrimary"),
            engine_cylinders: get("EngineCylinders"),
            displacement_l: get("DisplacementL"),
            engine_hp: get("EngineHP"),
            transmission_style: get("TransmissionStyle"),
            transmission_speeds: get("TransmissionSpeeds"),
            doors: get("Doors"),
            manufacturer: get("Manufacturer"),
            plant_country: get("PlantCountry"),
            error_code: get("ErrorCode"),
            safety: None,
            recalls: None,
            complaints: None,
            extra,
        }
    }

    pub fn model_key(&self) -> Option<ModelKey> {
        ModelKey::new(
            self.model_year.as_deref()?,
            self.make.as_deref()?,
            self.model.as_deref()?,
        )
    }

    pub fn apply(&mut self, aux: Auxiliary) {
        match aux {
            Auxiliary::Safety(s) => self.safety = Some(s),
            Auxiliary::Recalls(r) => self.recalls = Some(r),
            Auxiliary::Complaints(c) => self.complaints = Some(c),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == EnrichmentFields::default()
    }
}

// recall dates arrive as dd/mm/yyyy; accept iso too
fn parse_report_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

fn join_non_empty<'a>(parts: impl Iterator<Item = &'a str>, sep: &str) -> Option<String> {
    let joined = parts.collect::<Vec<_>>().join(sep);
    if joined.is_empty() { None } else { Some(joined) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recall(component: &str, date: &str) -> Recall {
        Recall {
            campaign: None,
            component: Some(component.to_string()),
            report_date: Some(date.to_string()),
        }
    }

    #[test]
    fn model_key_requires_all_parts() {
        let key = ModelKey::new("2019", " Ford", "f-150 ").unwrap();
        assert_eq!(key.model_year, 2019);
        assert_eq!(key.make, "FORD");
        assert_eq!(key.model, "F-150");

        assert!(ModelKey::new("", "Ford", "F-150").is_none());
        assert!(ModelKey::new("2019", "", "F-150").is_none());
        assert!(ModelKey::new("nineteen", "Ford", "F-150").is_none());
    }

    #[test]
    fn model_key_coalesces_case() {
        assert_eq!(
            ModelKey::new("2019", "FORD", "F-150"),
            ModelKey::new("2019", "ford", "f-150")
        );
    }

    #[test]
    fn recall_summary_dedups_components_and_finds_latest() {
        let recalls = vec![
            recall("AIR BAGS", "05/11/2020"),
            recall("BRAKES", "17/02/2021"),
            recall("AIR BAGS", "01/01/2019"),
        ];

        let summary = RecallSummary::from_recalls(&recalls);
        assert_eq!(summary.total_recalls, 3);
        assert_eq!(summary.recall_components.as_deref(), Some("AIR BAGS; BRAKES"));
        assert_eq!(summary.latest_recall_date, NaiveDate::from_ymd_opt(2021, 2, 17));
    }

    #[test]
    fn empty_recalls_summarize_to_zero() {
        let summary = RecallSummary::from_recalls(&[]);
        assert_eq!(summary.total_recalls, 0);
        assert_eq!(summary.recall_components, None);
        assert_eq!(summary.latest_recall_date, None);
    }

    #[test]
    fn complaint_summary_totals_and_ranks_areas() {
        let complaints = vec![
            Complaint {
                components: Some("ENGINE, POWER TRAIN".into()),
                injuries: 1,
                deaths: 0,
                crash: true,
                fire: false,
            },
            Complaint {
                components: Some("ENGINE".into()),
                injuries: 0,
                deaths: 1,
                crash: false,
                fire: true,
            },
            Complaint {
                components: Some("ELECTRICAL SYSTEM".into()),
                injuries: 2,
                deaths: 0,
                crash: true,
                fire: false,
            },
        ];

        let summary = ComplaintSummary::from_complaints(&complaints);
        assert_eq!(summary.total_complaints, 3);
        assert_eq!(summary.injuries, 3);
        assert_eq!(summary.deaths, 1);
        assert_eq!(summary.crash_related, 2);
        assert_eq!(summary.fire_related, 1);
        assert_eq!(
            summary.common_areas.as_deref(),
            Some("ENGINE, ELECTRICAL SYSTEM, POWER TRAIN")
        );
    }

    #[test]
    fn decoded_fields_split_into_columns_and_extra() {
        let mut fields = BTreeMap::new();
        fields.insert("Trim".to_string(), "XLT".to_string());
        fields.insert("BodyClass".to_string(), "Pickup".to_string());
        fields.insert("PlantCity".to_string(), "DEARBORN".to_string());

        let decoded = DecodedVehicle {
            vin: "1FTFW1ET5DFC10312".into(),
            make: Some("FORD".into()),
            model: Some("F-150".into()),
            model_year: Some("2013".into()),
            fields,
        };

        let enrichment = EnrichmentFields::from_decoded(&decoded);
        assert_eq!(enrichment.trim.as_deref(), Some("XLT"));
        assert_eq!(enrichment.body_class.as_deref(), Some("Pickup"));
        assert_eq!(enrichment.extra.get("PlantCity").map(String::as_str), Some("DEARBORN"));
        assert!(!enrichment.extra.contains_key("Trim"));
        assert_eq!(enrichment.model_key(), ModelKey::new("2013", "FORD", "F-150"));
    }

    #[test]
    fn default_record_is_empty() {
        assert!(EnrichmentFields::default().is_empty());

        let mut fields = EnrichmentFields::default();
        fields.apply(Auxiliary::Recalls(RecallSummary::default()));
        assert!(!fields.is_empty());
    }
}
