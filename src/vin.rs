//! VIN validity filter.
//!
//! Listings frequently carry masked or placeholder VINs ("1FT*****",
//! "invalid", "N/A"). Those rows are still stored as snapshots but are
//! never deduplicated against each other and never sent for enrichment.

/// Shortest string accepted as a VIN. Real VINs are 17 characters, but
/// pre-1981 vehicles carry shorter serials and the lookup service accepts
/// partial VINs, so only obvious junk is rejected.
pub const MIN_VIN_LEN: usize = 3;

const MASK_CHARS: &[char] = &['*', '#', '?', 'X'];

pub fn is_valid(vin: &str) -> bool {
    let vin = vin.trim();
    if vin.chars().count() < MIN_VIN_LEN {
        return false;
    }

    // masked vins replace the serial with a run of mask characters
    if vin.contains(['*', '#', '?']) || has_mask_run(vin) {
        return false;
    }

    let lower = vin.to_ascii_lowercase();
    !(lower.contains("invalid") || lower == "n/a" || lower == "none" || lower == "null")
}

/// Normalizes a raw vin for storage: trims whitespace, drops empties and
/// upper-cases, which is how the decode service reports vins back.
pub fn clean(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_ascii_uppercase)
}

// "XXXXX" tails are how some sources mask the serial
fn has_mask_run(vin: &str) -> bool {
    let mut run = 0;
    for c in vin.chars() {
        if MASK_CHARS.contains(&c) {
            run += 1;
            if run >= 5 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
