//! Line identifier resolution for records whose `id` is null.
//!
//! Resolution is pluggable through [`LineResolver`]. The default,
//! [`ExactNameResolver`], only accepts exact name matches; a name that maps to
//! more than one identifier is reported as ambiguous instead of guessed.

use std::collections::{BTreeSet, HashMap};

use crate::extract::types::RawLine;

/// Outcome of looking a single name up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameLookup {
    Match(String),
    NoMatch,
    Ambiguous(Vec<String>),
}

pub trait LineResolver: Send + Sync {
    fn lookup(&self, name: &str) -> NameLookup;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmappedReason {
    /// The record carries neither an id nor any name to look up.
    NoName,
    NoMatch { names: Vec<String> },
    Ambiguous { names: Vec<String>, candidates: Vec<String> },
}

impl std::fmt::Display for UnmappedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmappedReason::NoName => f.write_str("no line id and no line name"),
            UnmappedReason::NoMatch { names } => {
                write!(f, "no line matches name(s) {}", names.join(", "))
            }
            UnmappedReason::Ambiguous { names, candidates } => write!(
                f,
                "name(s) {} match several lines: {}",
                names.join(", "),
                candidates.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The raw record carried the id itself.
    Present(String),
    /// The id was recovered from other fields of the record.
    Resolved(String),
    Unmapped(UnmappedReason),
}

impl Resolution {
    pub fn line_id(&self) -> Option<&str> {
        match self {
            Resolution::Present(id) | Resolution::Resolved(id) => Some(id),
            Resolution::Unmapped(_) => None,
        }
    }
}

/// Resolves from a set of candidate names. Every match must agree.
pub fn resolve_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
    resolver: &dyn LineResolver,
) -> Resolution {
    let names: Vec<String> = names
        .into_iter()
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if names.is_empty() {
        return Resolution::Unmapped(UnmappedReason::NoName);
    }

    let mut matched = BTreeSet::new();
    let mut ambiguous = false;
    for name in &names {
        match resolver.lookup(name) {
            NameLookup::Match(id) => {
                matched.insert(id);
            }
            NameLookup::Ambiguous(ids) => {
                ambiguous = true;
                matched.extend(ids);
            }
            NameLookup::NoMatch => {}
        }
    }

    match matched.len() {
        0 => Resolution::Unmapped(UnmappedReason::NoMatch { names }),
        1 if !ambiguous => Resolution::Resolved(matched.into_iter().next().unwrap_or_default()),
        _ => Resolution::Unmapped(UnmappedReason::Ambiguous {
            names,
            candidates: matched.into_iter().collect(),
        }),
    }
}

/// Resolves the line id of a catalogue record.
///
/// Order: the record's own `id`; a single line id carried by its route
/// sections; then the line name and any section-level line names.
pub fn resolve_line(line: &RawLine, resolver: &dyn LineResolver) -> Resolution {
    if let Some(id) = line.id.as_deref().filter(|id| !id.is_empty()) {
        return Resolution::Present(id.to_string());
    }

    let section_ids: BTreeSet<&str> = line
        .route_sections
        .iter()
        .filter_map(|s| s.line_id.as_deref())
        .filter(|id| !id.is_empty())
        .collect();
    if section_ids.len() == 1 {
        if let Some(id) = section_ids.into_iter().next() {
            return Resolution::Resolved(id.to_string());
        }
    }

    let names = line
        .name
        .as_deref()
        .into_iter()
        .chain(line.route_sections.iter().filter_map(|s| s.line_name.as_deref()));
    resolve_names(names, resolver)
}

/// Exact, case-sensitive line name to id table.
#[derive(Debug, Clone, Default)]
pub struct ExactNameResolver {
    names: HashMap<String, BTreeSet<String>>,
}

impl ExactNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, id: impl Into<String>) {
        self.names.entry(name.into()).or_default().insert(id.into());
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut resolver = Self::new();
        for (name, id) in entries {
            resolver.insert(name, id);
        }
        resolver
    }

    /// Adds `name -> id` for every catalogue record that carries both.
    pub fn learn_from<'a>(mut self, lines: impl IntoIterator<Item = &'a RawLine>) -> Self {
        for line in lines {
            if let (Some(id), Some(name)) = (line.id.as_deref(), line.name.as_deref()) {
                if !id.is_empty() && !name.is_empty() {
                    self.insert(name, id);
                }
            }
        }
        self
    }

    /// Number of distinct names the resolver knows.
    pub fn known_names(&self) -> usize {
        self.names.len()
    }
}

impl LineResolver for ExactNameResolver {
    fn lookup(&self, name: &str) -> NameLookup {
        match self.names.get(name) {
            None => NameLookup::NoMatch,
            Some(ids) if ids.len() == 1 => ids
                .iter()
                .next()
                .map_or(NameLookup::NoMatch, |id| NameLookup::Match(id.clone())),
            Some(ids) => NameLookup::Ambiguous(ids.iter().cloned().collect()),
        }
    }
}
