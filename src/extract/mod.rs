//! Typed query functions over the transit API.
//!
//! Extractors build requests, capture the raw response as a [`RawPayload`] and
//! decode it into raw records. Errors from the client wrapper propagate
//! unchanged: an empty record list only ever means the API returned none.

mod payload;
pub mod types;

pub use payload::RawPayload;

use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::error::{FetchError, Shape};
use crate::fetch::{ApiClient, HttpClient, RequestFingerprint};
use crate::normalize::resolve::{LineResolver, resolve_line};
use types::{RawArrival, RawLine};

/// An array element that could not be decoded into a raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// A decoded record and its position in the payload array.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub index: usize,
    pub record: T,
}

/// Result of one extraction call: the untouched payload plus decoded records.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub payload: RawPayload,
    pub records: Vec<Decoded<T>>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> Extraction<T> {
    /// Number of elements the API returned, decodable or not.
    pub fn fetched(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    pub fn raw_records(&self) -> impl Iterator<Item = &T> {
        self.records.iter().map(|d| &d.record)
    }
}

/// Decodes each array element independently so one bad element does not
/// discard the rest.
fn decode_records<T: DeserializeOwned>(
    body: &serde_json::Value,
) -> (Vec<Decoded<T>>, Vec<RejectedRecord>) {
    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (index, element) in body.as_array().into_iter().flatten().enumerate() {
        match serde::Deserialize::deserialize(element) {
            Ok(record) => records.push(Decoded { index, record }),
            Err(e) => rejected.push(RejectedRecord {
                index,
                reason: e.to_string(),
            }),
        }
    }
    (records, rejected)
}

/// Filters accepted by `/Line/Route`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineRouteQuery {
    /// Lines to keep; `None` passes the whole catalogue through.
    pub line_ids: Option<Vec<String>>,
    pub modes: Option<Vec<String>>,
    pub service_types: Option<Vec<String>>,
}

impl LineRouteQuery {
    pub fn for_lines<I, S>(line_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            line_ids: Some(line_ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    fn non_empty(list: &Option<Vec<String>>) -> Option<&[String]> {
        list.as_deref().filter(|l| !l.is_empty())
    }

    pub fn requested_lines(&self) -> Option<&[String]> {
        Self::non_empty(&self.line_ids)
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(modes) = Self::non_empty(&self.modes) {
            params.push(("modes", modes.join(",")));
        }
        if let Some(types) = Self::non_empty(&self.service_types) {
            params.push(("serviceTypes", types.join(",")));
        }
        if let Some(ids) = self.requested_lines() {
            params.push(("lineIds", ids.join(",")));
        }
        params
    }
}

/// Catalogue records split by the requested line ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSelection {
    /// Records whose resolved line id was requested.
    pub selected: Vec<Decoded<RawLine>>,
    /// Records with no resolvable line id; they belong to no requested line.
    pub unresolved: Vec<Decoded<RawLine>>,
}

impl LineSelection {
    /// Both halves in payload order, as the normalizer consumes them.
    pub fn into_records(self) -> Vec<Decoded<RawLine>> {
        let mut records = self.selected;
        records.extend(self.unresolved);
        records.sort_by_key(|d| d.index);
        records
    }
}

/// The full route catalogue and the client-side selection made from it.
#[derive(Debug, Clone)]
pub struct LineRoutes {
    /// Everything the API returned, however much it ignored the filter.
    pub catalogue: Extraction<RawLine>,
    /// Whether line ids were requested at all.
    pub filtered: bool,
    pub selected: Vec<Decoded<RawLine>>,
    pub unresolved: Vec<Decoded<RawLine>>,
}

impl LineRoutes {
    /// Raw JSON of the selection.
    ///
    /// Unfiltered, this is the payload body untouched. Filtered, it is the
    /// payload elements of the selected records only.
    pub fn selected_body(&self) -> serde_json::Value {
        if !self.filtered {
            return self.catalogue.payload.body.clone();
        }
        let elements = self.catalogue.payload.body.as_array();
        serde_json::Value::Array(
            self.selected
                .iter()
                .filter_map(|d| elements.and_then(|e| e.get(d.index)).cloned())
                .collect(),
        )
    }
}

/// Splits catalogue records by whether their resolved line id was requested.
///
/// Records resolving to an id outside `line_ids` are dropped. Records with no
/// resolvable id go to `unresolved` so normalization can report them as
/// unmapped. Without requested lines every record is selected.
pub fn select_lines(
    lines: &[Decoded<RawLine>],
    line_ids: Option<&[String]>,
    resolver: &dyn LineResolver,
) -> LineSelection {
    let Some(line_ids) = line_ids else {
        return LineSelection {
            selected: lines.to_vec(),
            unresolved: Vec::new(),
        };
    };
    let wanted: BTreeSet<&str> = line_ids.iter().map(String::as_str).collect();

    let mut selection = LineSelection::default();
    for line in lines {
        match resolve_line(&line.record, resolver).line_id() {
            Some(id) if wanted.contains(id) => selection.selected.push(line.clone()),
            Some(_) => {}
            None => selection.unresolved.push(line.clone()),
        }
    }
    selection
}

pub struct Extractor<C> {
    api: ApiClient<C>,
}

impl<C: HttpClient> Extractor<C> {
    pub fn new(api: ApiClient<C>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient<C> {
        &self.api
    }

    /// Fetches predictions for one stop point, in the order the API returns them.
    #[tracing::instrument(skip(self))]
    pub async fn get_arrivals(
        &self,
        stop_point_id: &str,
    ) -> Result<Extraction<RawArrival>, FetchError> {
        let stop = stop_point_id.trim();
        if stop.is_empty() || stop.contains(['/', '?', '#']) {
            return Err(FetchError::InvalidUrl(format!(
                "invalid stop point id {stop_point_id:?}"
            )));
        }

        let path = format!("/StopPoint/{stop}/Arrivals");
        let body = self.api.request(&path, &[], Shape::Array).await?;
        let payload = RawPayload::new(RequestFingerprint::new(&path, &[]), body);
        let (records, rejected) = decode_records::<RawArrival>(&payload.body);

        if !rejected.is_empty() {
            warn!(stop_point_id = stop, rejected = rejected.len(), "Undecodable arrival records");
        }
        info!(stop_point_id = stop, records = records.len(), "Arrivals extracted");

        Ok(Extraction {
            payload,
            records,
            rejected,
        })
    }

    /// Fetches the route catalogue for the query's modes and service types.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_line_catalogue(
        &self,
        query: &LineRouteQuery,
    ) -> Result<Extraction<RawLine>, FetchError> {
        let path = "/Line/Route";
        let params = query.params();
        let body = self.api.request(path, &params, Shape::Array).await?;
        let payload = RawPayload::new(RequestFingerprint::new(path, &params), body);
        let (records, rejected) = decode_records::<RawLine>(&payload.body);

        if !rejected.is_empty() {
            warn!(rejected = rejected.len(), "Undecodable line records");
        }
        info!(records = records.len(), "Line catalogue extracted");

        Ok(Extraction {
            payload,
            records,
            rejected,
        })
    }

    /// Fetches the catalogue and narrows it to the requested lines client-side.
    pub async fn get_line_routes(
        &self,
        query: &LineRouteQuery,
        resolver: &dyn LineResolver,
    ) -> Result<LineRoutes, FetchError> {
        let catalogue = self.fetch_line_catalogue(query).await?;
        let selection = select_lines(&catalogue.records, query.requested_lines(), resolver);

        debug!(
            catalogue = catalogue.records.len(),
            selected = selection.selected.len(),
            unresolved = selection.unresolved.len(),
            "Line routes selected"
        );

        Ok(LineRoutes {
            catalogue,
            filtered: query.requested_lines().is_some(),
            selected: selection.selected,
            unresolved: selection.unresolved,
        })
    }
}
