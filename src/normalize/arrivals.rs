use tracing::info;

use super::resolve::{LineResolver, Resolution, resolve_names};
use super::{Diagnostic, Diagnostics, Normalized, dedup, parse_timestamp};
use crate::extract::Extraction;
use crate::extract::types::RawArrival;
use crate::rows::ArrivalRow;

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing {field}"))
}

/// Field validation that does not depend on line resolution.
fn validate(raw: &RawArrival) -> Result<ArrivalRow, String> {
    let stop_point_id = required(&raw.naptan_id, "naptanId")?;
    let vehicle_id = required(&raw.vehicle_id, "vehicleId")?;
    let expected = required(&raw.expected_arrival, "expectedArrival")?;
    let expected_arrival = parse_timestamp(expected)
        .ok_or_else(|| format!("unparseable expectedArrival {expected:?}"))?;
    let time_to_station = raw
        .time_to_station
        .ok_or_else(|| "missing timeToStation".to_string())?;
    if time_to_station < 0 {
        return Err(format!("negative timeToStation {time_to_station}"));
    }

    Ok(ArrivalRow {
        stop_point_id: stop_point_id.to_string(),
        line_id: String::new(),
        vehicle_id: vehicle_id.to_string(),
        expected_arrival,
        destination_name: raw.destination_name.clone(),
        time_to_station,
        line_name: raw.line_name.clone(),
        station_name: raw.station_name.clone(),
        platform_name: raw.platform_name.clone(),
        direction: raw.direction.clone(),
        mode_name: raw.mode_name.clone(),
    })
}

/// Validates, resolves, deduplicates and sorts one batch of arrivals.
///
/// Diagnostic indices are positions in the payload array. Output is ordered by expected arrival, then stop, line and vehicle.
pub fn normalize_arrivals(
    extraction: &Extraction<RawArrival>,
    resolver: &dyn LineResolver,
) -> Normalized<ArrivalRow> {
    let mut diagnostics = Diagnostics::default();
    diagnostics.extend_rejected(&extraction.rejected);

    let mut rows = Vec::with_capacity(extraction.records.len());
    for decoded in &extraction.records {
        let (index, raw) = (decoded.index, &decoded.record);
        let mut row = match validate(raw) {
            Ok(row) => row,
            Err(reason) => {
                diagnostics.reject(index, reason);
                continue;
            }
        };

        let resolution = match raw.line_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => Resolution::Present(id.to_string()),
            None => resolve_names(raw.line_name.as_deref(), resolver),
        };
        match resolution {
            Resolution::Present(id) | Resolution::Resolved(id) => row.line_id = id,
            Resolution::Unmapped(reason) => {
                diagnostics.push(Diagnostic::Unmapped {
                    index,
                    name: raw.line_name.clone(),
                    reason,
                });
                continue;
            }
        }
        rows.push(row);
    }

    let mut rows = dedup(rows, ArrivalRow::natural_key, &mut diagnostics);
    rows.sort_by(|a, b| {
        (a.expected_arrival, &a.stop_point_id, &a.line_id, &a.vehicle_id).cmp(&(
            b.expected_arrival,
            &b.stop_point_id,
            &b.line_id,
            &b.vehicle_id,
        ))
    });

    let counts = diagnostics.counts();
    info!(
        fetched = extraction.fetched(),
        accepted = rows.len(),
        malformed = counts.malformed,
        unmapped = counts.unmapped,
        conflicting = counts.conflicting,
        collapsed = counts.duplicates_collapsed,
        "Arrivals normalized"
    );

    Normalized { rows, diagnostics }
}
