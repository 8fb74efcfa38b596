//! Cluster event collection via templated `get events` queries
//!
//! The query is a go-template handed to the cluster CLI; it emits one record
//! per event with two separator tokens chosen here. Noise events (`Started`,
//! `Created`) are filtered inside the query so they never cross the wire.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Default field separator (ASCII unit separator)
pub const FIELD_SEPARATOR: &str = "\u{1f}";
/// Default record separator (ASCII record separator)
pub const RECORD_SEPARATOR: &str = "\u{1e}";

/// Events older than `deploy_started_at` minus this slack are not reported
const SEEN_SLACK_SECONDS: i64 = 5;

/// One normalized event record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub kind: String,
    pub name: String,
    pub count: i64,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub reason: String,
    pub message: String,
}

impl EventRecord {
    /// `"<reason>: <message> (<count> events)"`
    pub fn to_text(&self) -> String {
        format!("{}: {} ({} events)", self.reason, self.message, self.count)
    }

    fn seen_since(&self, deploy_started_at: Option<DateTime<Utc>>) -> bool {
        match (self.last_timestamp, deploy_started_at) {
            (Some(last), Some(started)) => {
                last >= started - chrono::Duration::seconds(SEEN_SLACK_SECONDS)
            }
            // No cutoff or unparseable timestamp: report rather than hide
            _ => true,
        }
    }
}

/// Builds and parses the per-resource event query
#[derive(Debug, Clone)]
pub struct EventQuery {
    kind: String,
    name: String,
    field_separator: String,
    record_separator: String,
}

impl EventQuery {
    pub fn new(kind: &str, name: &str) -> Self {
        Self::with_separators(kind, name, FIELD_SEPARATOR, RECORD_SEPARATOR)
    }

    /// Any separator pair works as long as the event texts don't contain it
    pub fn with_separators(kind: &str, name: &str, field: &str, record: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            field_separator: field.to_string(),
            record_separator: record.to_string(),
        }
    }

    /// The go-template passed to `get events --output=go-template=…`
    pub fn go_template(&self) -> String {
        format!(
            "{{{{range .items}}}}{{{{if and (eq .involvedObject.kind \"{kind}\") \
             (eq .involvedObject.name \"{name}\") \
             (ne .reason \"Started\") (ne .reason \"Created\")}}}}\
             {{{{.involvedObject.kind}}}}{fs}{{{{.involvedObject.name}}}}{fs}\
             {{{{.count}}}}{fs}{{{{.lastTimestamp}}}}{fs}{{{{.reason}}}}{fs}\
             {{{{.message}}}}{rs}{{{{end}}}}{{{{end}}}}",
            kind = self.kind,
            name = self.name,
            fs = self.field_separator,
            rs = self.record_separator,
        )
    }

    /// Parse the query output into records
    pub fn parse(&self, output: &str) -> Vec<EventRecord> {
        output
            .split(&self.record_separator)
            .filter_map(|record| {
                let fields: Vec<&str> = record.split(&self.field_separator).collect();
                if fields.len() != 6 {
                    return None;
                }
                Some(EventRecord {
                    kind: fields[0].trim_start_matches('\n').to_string(),
                    name: fields[1].to_string(),
                    count: fields[2].parse().unwrap_or(1),
                    last_timestamp: DateTime::parse_from_rfc3339(fields[3])
                        .ok()
                        .map(|t| t.with_timezone(&Utc)),
                    reason: fields[4].to_string(),
                    message: fields[5].replace('\n', " ").trim().to_string(),
                })
            })
            .collect()
    }

    /// Group the *seen* events by resource id
    pub fn group_seen(
        &self,
        output: &str,
        deploy_started_at: Option<DateTime<Utc>>,
    ) -> IndexMap<String, Vec<String>> {
        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for record in self.parse(output) {
            if !record.seen_since(deploy_started_at) {
                continue;
            }
            grouped
                .entry(format!("{}/{}", record.kind, record.name))
                .or_default()
                .push(record.to_text());
        }
        grouped
    }
}
