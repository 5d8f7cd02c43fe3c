//! Database statistics for one scope.
//!
//! Queries are classified by their leading verb, grouped by a normalized
//! signature to find duplicates, and summed into millisecond totals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureError, QueryEvent, QuerySource};

pub const DEFAULT_SIGNATURE_CHARS: usize = 100;
pub const DEFAULT_SQL_MAX_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Leading SQL verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryVerb {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl QueryVerb {
    /// Classify by the first whitespace-delimited token, case-insensitively.
    pub fn classify(sql: &str) -> Self {
        let Some(token) = sql.split_whitespace().next() else {
            return Self::Other;
        };
        if token.eq_ignore_ascii_case("SELECT") {
            Self::Select
        } else if token.eq_ignore_ascii_case("INSERT") {
            Self::Insert
        } else if token.eq_ignore_ascii_case("UPDATE") {
            Self::Update
        } else if token.eq_ignore_ascii_case("DELETE") {
            Self::Delete
        } else {
            Self::Other
        }
    }
}

/// Per-verb query counts, serialized with upper-case keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTypeCounts {
    #[serde(rename = "SELECT")]
    pub select: u64,
    #[serde(rename = "INSERT")]
    pub insert: u64,
    #[serde(rename = "UPDATE")]
    pub update: u64,
    #[serde(rename = "DELETE")]
    pub delete: u64,
    #[serde(rename = "OTHER")]
    pub other: u64,
}

impl QueryTypeCounts {
    pub fn bump(&mut self, verb: QueryVerb) {
        match verb {
            QueryVerb::Select => self.select += 1,
            QueryVerb::Insert => self.insert += 1,
            QueryVerb::Update => self.update += 1,
            QueryVerb::Delete => self.delete += 1,
            QueryVerb::Other => self.other += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.select + self.insert + self.update + self.delete + self.other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySample {
    pub sql: String,
    pub duration_ms: u64,
}

/// Queries sharing a signature, reported only when seen more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub sql_signature: String,
    pub count: u64,
    pub total_duration_ms: u64,
}

/// Aggregate database telemetry for one test.
///
/// All-zero means "unknown" as much as "no queries": collection failures
/// collapse to this value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub count: u64,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub query_types: QueryTypeCounts,
    pub duplicate_queries: Vec<DuplicateGroup>,
    pub queries: Vec<QuerySample>,
}

/// Signature used for duplicate grouping: trimmed, upper-cased, first `chars` characters.
pub fn sql_signature(sql: &str, chars: usize) -> String {
    sql.trim().to_uppercase().chars().take(chars).collect()
}

/// Bound stored SQL to `max_chars`, marking truncation with a trailing ellipsis.
pub fn truncate_sql(sql: &str, max_chars: usize) -> String {
    match sql.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &sql[..cut], ELLIPSIS),
        None => sql.to_string(),
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

/// Reduces a scope's query slice into [`DatabaseStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseReducer {
    pub signature_chars: usize,
    pub sql_max_chars: usize,
}

impl Default for DatabaseReducer {
    fn default() -> Self {
        Self {
            signature_chars: DEFAULT_SIGNATURE_CHARS,
            sql_max_chars: DEFAULT_SQL_MAX_CHARS,
        }
    }
}

struct SignatureTally {
    count: u64,
    total_seconds: f64,
}

impl DatabaseReducer {
    pub fn reduce(&self, events: &[QueryEvent]) -> DatabaseStats {
        if events.is_empty() {
            return DatabaseStats::default();
        }

        let mut total_seconds = 0.0;
        let mut max_seconds: f64 = 0.0;
        let mut query_types = QueryTypeCounts::default();
        let mut queries = Vec::with_capacity(events.len());
        // First-seen order keeps duplicate output stable across runs.
        let mut order: Vec<String> = Vec::new();
        let mut tallies: HashMap<String, SignatureTally> = HashMap::new();

        for event in events {
            let seconds = event.duration_seconds;
            total_seconds += seconds;
            max_seconds = max_seconds.max(seconds);
            query_types.bump(QueryVerb::classify(&event.sql_text));

            queries.push(QuerySample {
                sql: truncate_sql(&event.sql_text, self.sql_max_chars),
                duration_ms: seconds_to_ms(seconds),
            });

            let signature = sql_signature(&event.sql_text, self.signature_chars);
            let tally = tallies.entry(signature.clone()).or_insert_with(|| {
                order.push(signature);
                SignatureTally {
                    count: 0,
                    total_seconds: 0.0,
                }
            });
            tally.count += 1;
            tally.total_seconds += seconds;
        }

        let duplicate_queries = order
            .into_iter()
            .filter_map(|signature| {
                let tally = tallies.get(&signature)?;
                (tally.count > 1).then(|| DuplicateGroup {
                    count: tally.count,
                    total_duration_ms: seconds_to_ms(tally.total_seconds),
                    sql_signature: signature,
                })
            })
            .collect();

        let count = events.len() as u64;
        DatabaseStats {
            count,
            total_duration_ms: seconds_to_ms(total_seconds),
            avg_duration_ms: seconds_to_ms(total_seconds / count as f64),
            max_duration_ms: seconds_to_ms(max_seconds),
            query_types,
            duplicate_queries,
            queries,
        }
    }
}

/// Read the queries logged since `watermark` and reduce them.
pub fn collect(
    source: &dyn QuerySource,
    watermark: usize,
    reducer: &DatabaseReducer,
) -> Result<DatabaseStats, CaptureError> {
    let raw = source.since(watermark)?;
    let events: Vec<QueryEvent> = raw.iter().map(|q| q.to_event()).collect();
    Ok(reducer.reduce(&events))
}
