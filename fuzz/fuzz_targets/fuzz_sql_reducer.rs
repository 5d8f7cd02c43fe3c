//! Fuzz target for SQL signature, truncation and scope reduction.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use trim_telemetry::aggregate::{sql_signature, truncate_sql, DatabaseReducer};
use trim_telemetry::capture::RawQuery;

#[derive(Debug, Arbitrary)]
struct ScopeInput {
    statements: Vec<(String, String)>,
    signature_chars: u8,
    sql_max_chars: u8,
}

fuzz_target!(|input: ScopeInput| {
    let reducer = DatabaseReducer {
        signature_chars: usize::from(input.signature_chars).max(1),
        sql_max_chars: usize::from(input.sql_max_chars).max(16),
    };

    let events: Vec<_> = input
        .statements
        .iter()
        .map(|(sql, time)| {
            let _ = sql_signature(sql, reducer.signature_chars);
            let _ = truncate_sql(sql, reducer.sql_max_chars);
            RawQuery::new(sql.as_str(), time.as_str()).to_event()
        })
        .collect();

    let stats = reducer.reduce(&events);
    assert_eq!(stats.count as usize, events.len());
});
