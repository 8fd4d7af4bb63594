//! Canonical, warehouse-bound records and their natural keys.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

pub const ARRIVALS_TABLE: &str = "arrivals";
pub const ROUTES_TABLE: &str = "line_routes";

/// Deterministic identity of a logical record, independent of surrogate ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NaturalKey {
    pub table: &'static str,
    pub parts: Vec<String>,
}

impl NaturalKey {
    pub fn new<I, S>(table: &'static str, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table, self.parts.join("|"))
    }
}

/// A column value as it is bound into, and read back from, the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(Option<String>),
    Int(i64),
}

/// Timestamps are stored as RFC 3339 text in UTC with second precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

fn serialize_opt_timestamp<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => s.serialize_str(&format_timestamp(ts)),
        None => s.serialize_none(),
    }
}

fn serialize_stops<S: Serializer>(stops: &[String], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&stops.join(";"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrivalRow {
    pub stop_point_id: String,
    pub line_id: String,
    pub vehicle_id: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub expected_arrival: DateTime<Utc>,
    pub destination_name: Option<String>,
    pub time_to_station: i64,
    pub line_name: Option<String>,
    pub station_name: Option<String>,
    pub platform_name: Option<String>,
    pub direction: Option<String>,
    pub mode_name: Option<String>,
}

impl ArrivalRow {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(
            ARRIVALS_TABLE,
            [
                self.stop_point_id.clone(),
                self.line_id.clone(),
                self.vehicle_id.clone(),
                format_timestamp(&self.expected_arrival),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRow {
    pub line_id: String,
    pub route_section: String,
    pub direction: String,
    pub service_type: String,
    pub line_name: Option<String>,
    pub mode_name: Option<String>,
    pub origin_name: Option<String>,
    pub destination_name: Option<String>,
    /// Ordered stop point ids along the section.
    #[serde(serialize_with = "serialize_stops")]
    pub stop_point_ids: Vec<String>,
    #[serde(serialize_with = "serialize_opt_timestamp")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_opt_timestamp")]
    pub valid_to: Option<DateTime<Utc>>,
}

impl RouteRow {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(
            ROUTES_TABLE,
            [
                self.line_id.clone(),
                self.route_section.clone(),
                self.direction.clone(),
                self.service_type.clone(),
            ],
        )
    }
}

/// The warehouse-bound tuple for either entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalRow {
    Arrival(ArrivalRow),
    Route(RouteRow),
}

impl CanonicalRow {
    pub fn table(&self) -> &'static str {
        match self {
            CanonicalRow::Arrival(_) => ARRIVALS_TABLE,
            CanonicalRow::Route(_) => ROUTES_TABLE,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            CanonicalRow::Arrival(r) => r.natural_key(),
            CanonicalRow::Route(r) => r.natural_key(),
        }
    }

    /// Natural-key columns in primary-key order.
    pub fn key_columns(&self) -> Vec<(&'static str, SqlValue)> {
        let text = |s: &String| SqlValue::Text(Some(s.clone()));
        match self {
            CanonicalRow::Arrival(r) => vec![
                ("stop_point_id", text(&r.stop_point_id)),
                ("line_id", text(&r.line_id)),
                ("vehicle_id", text(&r.vehicle_id)),
                (
                    "expected_arrival",
                    SqlValue::Text(Some(format_timestamp(&r.expected_arrival))),
                ),
            ],
            CanonicalRow::Route(r) => vec![
                ("line_id", text(&r.line_id)),
                ("route_section", text(&r.route_section)),
                ("direction", text(&r.direction)),
                ("service_type", text(&r.service_type)),
            ],
        }
    }

    /// Non-key columns; a difference in any of them makes an upsert an update.
    pub fn value_columns(&self) -> Vec<(&'static str, SqlValue)> {
        let text = |s: &Option<String>| SqlValue::Text(s.clone());
        match self {
            CanonicalRow::Arrival(r) => vec![
                ("destination_name", text(&r.destination_name)),
                ("time_to_station", SqlValue::Int(r.time_to_station)),
                ("line_name", text(&r.line_name)),
                ("station_name", text(&r.station_name)),
                ("platform_name", text(&r.platform_name)),
                ("direction", text(&r.direction)),
                ("mode_name", text(&r.mode_name)),
            ],
            CanonicalRow::Route(r) => vec![
                ("line_name", text(&r.line_name)),
                ("mode_name", text(&r.mode_name)),
                ("origin_name", text(&r.origin_name)),
                ("destination_name", text(&r.destination_name)),
                (
                    "stop_point_ids",
                    SqlValue::Text(Some(r.stop_point_ids.join(";"))),
                ),
                (
                    "valid_from",
                    SqlValue::Text(r.valid_from.as_ref().map(format_timestamp)),
                ),
                (
                    "valid_to",
                    SqlValue::Text(r.valid_to.as_ref().map(format_timestamp)),
                ),
            ],
        }
    }
}

impl From<ArrivalRow> for CanonicalRow {
    fn from(row: ArrivalRow) -> Self {
        CanonicalRow::Arrival(row)
    }
}

impl From<RouteRow> for CanonicalRow {
    fn from(row: RouteRow) -> Self {
        CanonicalRow::Route(row)
    }
}
