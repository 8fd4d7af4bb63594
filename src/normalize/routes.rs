use tracing::info;

use super::resolve::{LineResolver, Resolution, resolve_line};
use super::{Diagnostic, Diagnostics, Normalized, dedup, parse_timestamp};
use crate::extract::{Decoded, RejectedRecord};
use crate::extract::types::{RawLine, RawRouteSection};
use crate::rows::RouteRow;

fn optional_timestamp(
    value: &Option<String>,
    field: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, String> {
    match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| format!("unparseable {field} {raw:?}")),
    }
}

fn section_row(line_id: &str, line: &RawLine, section: &RawRouteSection) -> Result<RouteRow, String> {
    let text = |v: &Option<String>, field: &str| {
        v.as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("missing {field}"))
    };

    Ok(RouteRow {
        line_id: line_id.to_string(),
        route_section: text(&section.name, "name")?,
        direction: text(&section.direction, "direction")?,
        service_type: text(&section.service_type, "serviceType")?,
        line_name: line.name.clone(),
        mode_name: line.mode_name.clone(),
        origin_name: section.origination_name.clone(),
        destination_name: section.destination_name.clone(),
        stop_point_ids: section.stop_sequence(),
        valid_from: optional_timestamp(&section.valid_from, "validFrom")?,
        valid_to: optional_timestamp(&section.valid_to, "validTo")?,
    })
}

/// Expands catalogue records into one row per route section.
///
/// Diagnostic indices are the records' positions in the payload array.
/// A record whose line id cannot be resolved is reported once as unmapped and
/// contributes no rows. A malformed section is rejected on its own; the
/// record's other sections are still accepted.
pub fn normalize_routes(
    lines: &[Decoded<RawLine>],
    rejected: &[RejectedRecord],
    resolver: &dyn LineResolver,
) -> Normalized<RouteRow> {
    let mut diagnostics = Diagnostics::default();
    diagnostics.extend_rejected(rejected);

    let mut rows = Vec::new();
    for decoded in lines {
        let (index, line) = (decoded.index, &decoded.record);
        let line_id = match resolve_line(line, resolver) {
            Resolution::Present(id) | Resolution::Resolved(id) => id,
            Resolution::Unmapped(reason) => {
                diagnostics.push(Diagnostic::Unmapped {
                    index,
                    name: line.name.clone(),
                    reason,
                });
                continue;
            }
        };

        for (section_index, section) in line.route_sections.iter().enumerate() {
            match section_row(&line_id, line, section) {
                Ok(row) => rows.push(row),
                Err(reason) => {
                    diagnostics.reject(index, format!("routeSections[{section_index}]: {reason}"))
                }
            }
        }
    }

    let mut rows = dedup(rows, RouteRow::natural_key, &mut diagnostics);
    rows.sort_by_key(RouteRow::natural_key);

    let counts = diagnostics.counts();
    info!(
        lines = lines.len(),
        accepted = rows.len(),
        malformed = counts.malformed,
        unmapped = counts.unmapped,
        conflicting = counts.conflicting,
        collapsed = counts.duplicates_collapsed,
        "Line routes normalized"
    );

    Normalized { rows, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::resolve::ExactNameResolver;
    use serde_json::json;

    fn lines(value: serde_json::Value) -> Vec<Decoded<RawLine>> {
        let raw: Vec<RawLine> = serde_json::from_value(value).unwrap();
        raw.into_iter()
            .enumerate()
            .map(|(index, record)| Decoded { index, record })
            .collect()
    }

    fn section(name: &str, direction: &str, service: &str) -> serde_json::Value {
        json!({
            "name": name,
            "direction": direction,
            "serviceType": service,
            "originator": "940GZZLUWRP",
            "destination": "940GZZLUEPG",
            "originationName": "West Ruislip",
            "destinationName": "Epping",
            "validFrom": "2026-01-01T00:00:00Z",
            "validTo": "2026-12-31T00:00:00Z"
        })
    }

    #[test]
    fn test_sections_become_rows() {
        let raw = lines(json!([{
            "id": "central",
            "name": "Central",
            "modeName": "tube",
            "routeSections": [
                section("West Ruislip - Epping", "outbound", "Regular"),
                section("West Ruislip - Epping", "outbound", "Night"),
                section("Epping - West Ruislip", "inbound", "Regular")
            ]
        }]));

        let out = normalize_routes(&raw, &[], &ExactNameResolver::new());
        assert_eq!(out.rows.len(), 3);
        assert!(out.rows.iter().all(|r| r.line_id == "central"));
        assert_eq!(out.rows[0].stop_point_ids, vec!["940GZZLUWRP", "940GZZLUEPG"]);
        assert!(out.rows[0].valid_from.is_some());
        assert_eq!(out.diagnostics.counts(), Default::default());
    }

    #[test]
    fn test_unmapped_line_is_counted_not_emitted() {
        let raw = lines(json!([
            {"id": null, "name": "Ghost", "routeSections": [section("A - B", "inbound", "Regular")]},
            {"id": null, "name": null, "routeSections": [section("C - D", "inbound", "Regular")]}
        ]));

        let out = normalize_routes(&raw, &[], &ExactNameResolver::new());
        assert!(out.rows.is_empty());
        assert_eq!(out.diagnostics.counts().unmapped, 2);
    }

    #[test]
    fn test_resolved_line_uses_lookup_id() {
        let raw = lines(json!([
            {"id": null, "name": "Northern", "routeSections": [section("Morden - Edgware", "inbound", "Regular")]}
        ]));
        let resolver = ExactNameResolver::with_entries([("Northern", "northern")]);

        let out = normalize_routes(&raw, &[], &resolver);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].line_id, "northern");
    }

    #[test]
    fn test_malformed_section_rejected_alone() {
        let mut bad = section("A - B", "inbound", "Regular");
        bad["direction"] = json!(null);
        let mut bad_date = section("C - D", "inbound", "Regular");
        bad_date["validTo"] = json!("someday");
        let raw = lines(json!([{
            "id": "dlr",
            "name": "DLR",
            "routeSections": [bad, bad_date, section("E - F", "outbound", "Regular")]
        }]));

        let out = normalize_routes(&raw, &[], &ExactNameResolver::new());
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].route_section, "E - F");
        assert_eq!(out.diagnostics.counts().malformed, 2);
    }

    #[test]
    fn test_duplicate_sections_across_records() {
        let raw = lines(json!([
            {"id": "central", "name": "Central", "routeSections": [section("A - B", "inbound", "Regular")]},
            {"id": "central", "name": "Central", "routeSections": [section("A - B", "inbound", "Regular")]}
        ]));

        let out = normalize_routes(&raw, &[], &ExactNameResolver::new());
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.diagnostics.duplicates_collapsed, 1);
    }

    #[test]
    fn test_indices_follow_payload_positions() {
        let mut raw = lines(json!([
            {"id": null, "name": "Ghost", "routeSections": [section("A - B", "inbound", "Regular")]},
            {"id": "dlr", "name": "DLR", "routeSections": [{"name": "C - D"}]}
        ]));
        // positions 0, 2 and 3 were undecodable or filtered out upstream
        raw[0].index = 1;
        raw[1].index = 4;
        let rejected = [RejectedRecord {
            index: 0,
            reason: "invalid type: sequence".into(),
        }];

        let out = normalize_routes(&raw, &rejected, &ExactNameResolver::new());
        assert!(out.rows.is_empty());
        assert!(matches!(
            out.diagnostics.entries.as_slice(),
            [
                Diagnostic::MalformedRecord { index: 0, .. },
                Diagnostic::Unmapped { index: 1, .. },
                Diagnostic::MalformedRecord { index: 4, .. },
            ]
        ));
    }
}
