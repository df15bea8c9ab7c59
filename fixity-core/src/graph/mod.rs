//! Provenance graph for a single content digest.
//!
//! Rows recorded for one digest are grouped by identity (machine, path, name).
//! Each group collapses into a [`ShaSegment`] spanning the earliest and latest
//! scan dates seen for that identity. Segments are ordered by
//! (machine, start date, identity), and every renderer in [`render`] walks
//! them in that order.

pub mod render;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};
use fixity_model::{ShaSegment, scan_date_from_urn};
use sqlx::FromRow;

pub use render::{
    node_id, render, render_ascii_chain, render_dot, render_mermaid,
};

/// Scan date used when neither the URN nor the timestamp yields one
/// (1970-01-01). It only keeps ordering stable and is not a real observation.
pub fn sentinel_date() -> NaiveDate {
    NaiveDate::default()
}

/// The columns of a persisted record that the graph needs.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct GraphRow {
    pub machine_name: String,
    pub file_path: String,
    pub file_name: String,
    pub urn: String,
    pub scan_ts: String,
}

/// Trailing URN date, else the calendar date of `scan_ts` in its own
/// offset, else [`sentinel_date`].
pub fn scan_date_for(urn: &str, scan_ts: &str) -> NaiveDate {
    if let Some(date) = scan_date_from_urn(urn) {
        return date;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(scan_ts) {
        return ts.date_naive();
    }
    sentinel_date()
}

pub fn build_segments<'a, I>(rows: I) -> Vec<ShaSegment>
where
    I: IntoIterator<Item = &'a GraphRow>,
{
    let mut grouped: BTreeMap<(&str, &str, &str), BTreeSet<NaiveDate>> =
        BTreeMap::new();
    for row in rows {
        grouped
            .entry((
                row.machine_name.as_str(),
                row.file_path.as_str(),
                row.file_name.as_str(),
            ))
            .or_default()
            .insert(scan_date_for(&row.urn, &row.scan_ts));
    }

    let mut segments: Vec<ShaSegment> = grouped
        .into_iter()
        .filter_map(|((machine, path, name), dates)| {
            let start = *dates.first()?;
            let end = *dates.last()?;
            Some(ShaSegment {
                machine_name: machine.to_string(),
                file_path: path.to_string(),
                file_name: name.to_string(),
                start_date: start,
                end_date: end,
            })
        })
        .collect();

    segments.sort_by(|a, b| {
        (&a.machine_name, a.start_date, &a.file_path, &a.file_name).cmp(&(
            &b.machine_name,
            b.start_date,
            &b.file_path,
            &b.file_name,
        ))
    });
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(machine: &str, path: &str, date: &str) -> GraphRow {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        GraphRow {
            machine_name: machine.into(),
            file_path: path.into(),
            file_name: name.clone(),
            urn: format!("{machine}:{name}:.bin:1:{date}"),
            scan_ts: format!("{date}T12:00:00+00:00"),
        }
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn identities_collapse_into_date_spans() {
        let rows = vec![
            row("M1", "/a/file.bin", "2026-01-02"),
            row("M1", "/a/file.bin", "2026-01-01"),
            row("M1", "/b/file.bin", "2026-01-03"),
            row("M1", "/a/file.bin", "2026-01-02"),
        ];

        let segments = build_segments(&rows);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].file_path, "/a/file.bin");
        assert_eq!(segments[0].start_date, date("2026-01-01"));
        assert_eq!(segments[0].end_date, date("2026-01-02"));
        assert_eq!(segments[1].file_path, "/b/file.bin");
        assert_eq!(segments[1].start_date, date("2026-01-03"));
        assert_eq!(segments[1].end_date, date("2026-01-03"));
    }

    #[test]
    fn ordering_is_machine_then_start_then_identity() {
        let rows = vec![
            row("M2", "/z", "2026-01-01"),
            row("M1", "/y", "2026-02-01"),
            row("M1", "/x", "2026-03-01"),
            row("M1", "/w", "2026-02-01"),
        ];

        let order: Vec<(String, String)> = build_segments(&rows)
            .into_iter()
            .map(|s| (s.machine_name, s.file_path))
            .collect();

        assert_eq!(
            order,
            vec![
                ("M1".to_string(), "/w".to_string()),
                ("M1".to_string(), "/y".to_string()),
                ("M1".to_string(), "/x".to_string()),
                ("M2".to_string(), "/z".to_string()),
            ]
        );
    }

    #[test]
    fn scan_date_falls_back_to_timestamp_then_sentinel() {
        assert_eq!(
            scan_date_for("m:f:.x:1:2026-05-06", "2020-01-01T00:00:00Z"),
            date("2026-05-06")
        );
        assert_eq!(
            scan_date_for("m:f:.x:1:bogus", "2026-05-06T23:30:00-05:00"),
            date("2026-05-06")
        );
        assert_eq!(scan_date_for("no-date", "not a timestamp"), sentinel_date());
        assert_eq!(sentinel_date(), date("1970-01-01"));
    }
}
