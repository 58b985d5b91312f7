//! Structured entity extraction from free-text queries.
//!
//! Extractors run independently over the raw query; span-producing
//! extractors (documents, dates, money) go through overlap resolution
//! where the longest match wins and ties break on extractor priority
//! (CNPJ, CPF, dates, money). Word-level extractors (locations,
//! categories, organizations) match on a diacritic-folded copy of the
//! text and keep display forms intact.
//!
//! An empty result is legal; extraction never fails.

pub mod dates;
pub mod documents;
pub mod gazetteer;
pub mod money;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fold text for matching: lowercase and strip Portuguese diacritics.
/// Display strings are never folded.
pub fn fold_for_matching(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// An inclusive date range with `start ≤ end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day of the period
    pub start: NaiveDate,
    /// Last day of the period
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting inverted bounds.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The smallest range covering both.
    pub fn merge(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Whether a date falls inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A geographic reference: a federative unit, optionally narrowed to a
/// municipality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Two-letter UF code
    pub uf: String,
    /// Municipality display name, when the reference is that specific
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
}

impl Location {
    /// A state-level reference.
    pub fn uf(code: impl Into<String>) -> Self {
        Self {
            uf: code.into(),
            municipality: None,
        }
    }

    /// A municipality-level reference.
    pub fn municipality(uf: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uf: uf.into(),
            municipality: Some(name.into()),
        }
    }
}

/// The heterogeneous bag of entities extracted from a query.
///
/// Collections are ordered so iteration, serialization and downstream
/// planning are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    /// Checksum-valid CNPJs, canonical 14-digit form
    pub cnpjs: BTreeSet<String>,
    /// Checksum-valid CPFs, canonical 11-digit form
    pub cpfs: BTreeSet<String>,
    /// The period the query refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Monetary amounts in centavos, ascending
    pub money: Vec<i64>,
    /// Geographic references
    pub locations: BTreeSet<Location>,
    /// Organization names, display form
    pub organizations: BTreeSet<String>,
    /// Spending categories, display form
    pub categories: BTreeSet<String>,
}

impl Entities {
    /// Whether nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.cnpjs.is_empty()
            && self.cpfs.is_empty()
            && self.date_range.is_none()
            && self.money.is_empty()
            && self.locations.is_empty()
            && self.organizations.is_empty()
            && self.categories.is_empty()
    }

    /// The smallest extracted amount, in centavos.
    pub fn money_min(&self) -> Option<i64> {
        self.money.first().copied()
    }

    /// UF codes referenced, directly or through municipalities.
    pub fn ufs(&self) -> BTreeSet<&str> {
        self.locations.iter().map(|l| l.uf.as_str()).collect()
    }
}

/// Extractor priority for overlap resolution; lower wins ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SpanKind {
    Cnpj,
    Cpf,
    Date,
    Money,
}

#[derive(Debug)]
struct SpanCandidate {
    start: usize,
    end: usize,
    kind: SpanKind,
    payload: SpanPayload,
}

#[derive(Debug)]
enum SpanPayload {
    Document(String),
    Date(DateRange),
    Money(i64),
}

/// Rule-based entity extractor. Stateless and deterministic: the same
/// query and reference clock always produce the same `Entities`.
#[derive(Debug, Clone, Default)]
pub struct EntityExtractor;

impl EntityExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract entities from a query. Relative date expressions are
    /// anchored at `reference`.
    pub fn extract(&self, query: &str, reference: DateTime<Utc>) -> Entities {
        let query = query.trim();
        let folded = fold_for_matching(query);
        let reference_date = reference.date_naive();

        let mut candidates: Vec<SpanCandidate> = Vec::new();
        for span in documents::find_cnpjs(query) {
            candidates.push(SpanCandidate {
                start: span.start,
                end: span.end,
                kind: SpanKind::Cnpj,
                payload: SpanPayload::Document(span.canonical),
            });
        }
        for span in documents::find_cpfs(query) {
            candidates.push(SpanCandidate {
                start: span.start,
                end: span.end,
                kind: SpanKind::Cpf,
                payload: SpanPayload::Document(span.canonical),
            });
        }
        for candidate in dates::find_dates(query, reference_date) {
            candidates.push(SpanCandidate {
                start: candidate.start,
                end: candidate.end,
                kind: SpanKind::Date,
                payload: SpanPayload::Date(candidate.range),
            });
        }
        for candidate in money::find_money(query) {
            candidates.push(SpanCandidate {
                start: candidate.start,
                end: candidate.end,
                kind: SpanKind::Money,
                payload: SpanPayload::Money(candidate.centavos),
            });
        }

        let accepted = resolve_overlaps(candidates);

        let mut entities = Entities::default();
        for candidate in accepted {
            match candidate.payload {
                SpanPayload::Document(canonical) => match candidate.kind {
                    SpanKind::Cnpj => {
                        entities.cnpjs.insert(canonical);
                    }
                    SpanKind::Cpf => {
                        entities.cpfs.insert(canonical);
                    }
                    _ => {}
                },
                SpanPayload::Date(range) => {
                    entities.date_range = Some(match entities.date_range {
                        Some(existing) => existing.merge(range),
                        None => range,
                    });
                }
                SpanPayload::Money(centavos) => entities.money.push(centavos),
            }
        }
        entities.money.sort_unstable();
        entities.money.dedup();

        entities.locations = gazetteer::find_locations(query, &folded);
        entities.categories = gazetteer::find_categories(&folded);
        entities.organizations = gazetteer::find_organizations(query, &folded);

        entities
    }
}

/// Longest match wins; ties break on extractor priority, then position.
fn resolve_overlaps(mut candidates: Vec<SpanCandidate>) -> Vec<SpanCandidate> {
    candidates.sort_by(|a, b| {
        (b.end - b.start)
            .cmp(&(a.end - a.start))
            .then(a.kind.cmp(&b.kind))
            .then(a.start.cmp(&b.start))
    });

    let mut accepted: Vec<SpanCandidate> = Vec::new();
    for candidate in candidates {
        let clashes = accepted
            .iter()
            .any(|kept| candidate.start < kept.end && kept.start < candidate.end);
        if !clashes {
            accepted.push(candidate);
        }
    }
    accepted.sort_by_key(|c| c.start);
    accepted
}
