//! Raw API record shapes.
//!
//! Every field is optional: the API omits keys inconsistently, and deciding
//! what is required belongs to the normalizer.

use serde::{Deserialize, Deserializer, Serialize};

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

/// One arrival prediction as returned by `/StopPoint/{id}/Arrivals`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArrival {
    pub id: Option<String>,
    pub naptan_id: Option<String>,
    pub line_id: Option<String>,
    pub line_name: Option<String>,
    pub vehicle_id: Option<String>,
    pub expected_arrival: Option<String>,
    pub destination_name: Option<String>,
    pub time_to_station: Option<i64>,
    pub station_name: Option<String>,
    pub platform_name: Option<String>,
    pub direction: Option<String>,
    pub mode_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRouteSection {
    pub name: Option<String>,
    pub direction: Option<String>,
    pub service_type: Option<String>,
    pub originator: Option<String>,
    pub destination: Option<String>,
    pub origination_name: Option<String>,
    pub destination_name: Option<String>,
    /// Full ordered stop list, when the section carries one.
    pub stop_points: Option<Vec<String>>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub line_id: Option<String>,
    pub line_name: Option<String>,
}

impl RawRouteSection {
    /// Ordered stop ids: the explicit list if present, else originator then destination.
    pub fn stop_sequence(&self) -> Vec<String> {
        match &self.stop_points {
            Some(stops) if !stops.is_empty() => stops.clone(),
            _ => self
                .originator
                .iter()
                .chain(self.destination.iter())
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServiceType {
    pub name: Option<String>,
}

/// One entry of the `/Line/Route` catalogue.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLine {
    pub id: Option<String>,
    pub name: Option<String>,
    pub mode_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub route_sections: Vec<RawRouteSection>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub service_types: Vec<RawServiceType>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_with_null_id_and_sections() {
        let line: RawLine = serde_json::from_value(json!({
            "id": null,
            "name": "Central",
            "routeSections": null,
            "serviceTypes": [{"name": "Regular"}]
        }))
        .unwrap();
        assert_eq!(line.id, None);
        assert!(line.route_sections.is_empty());
        assert_eq!(line.service_types[0].name.as_deref(), Some("Regular"));
    }

    #[test]
    fn test_arrival_ignores_unknown_fields() {
        let arrival: RawArrival = serde_json::from_value(json!({
            "$type": "Tfl.Api.Presentation.Entities.Prediction",
            "naptanId": "2420900042",
            "timeToStation": 30,
            "timing": {"read": "2026-10-14T08:00:00Z"}
        }))
        .unwrap();
        assert_eq!(arrival.naptan_id.as_deref(), Some("2420900042"));
        assert_eq!(arrival.time_to_station, Some(30));
        assert_eq!(arrival.line_id, None);
    }

    #[test]
    fn test_stop_sequence_fallback() {
        let section = RawRouteSection {
            originator: Some("940GZZLUWRP".into()),
            destination: Some("940GZZLUEPG".into()),
            ..Default::default()
        };
        assert_eq!(section.stop_sequence(), vec!["940GZZLUWRP", "940GZZLUEPG"]);

        let explicit = RawRouteSection {
            stop_points: Some(vec!["a".into(), "b".into(), "c".into()]),
            ..section
        };
        assert_eq!(explicit.stop_sequence(), vec!["a", "b", "c"]);
    }
}
