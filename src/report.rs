//! CSV timing report of a completed run.

use crate::schedule::FireReport;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::io;

#[derive(Debug, Serialize)]
struct ReportRow {
    kind: &'static str,
    run: Option<usize>,
    local_ms: i64,
    local_received_ms: Option<i64>,
    authority_ms: i64,
    offset_ms: i64,
    remaining_ms: Option<i64>,
}

/// Writes every probe sample and the fire instant to `file_path`.
pub fn to_csv(report: &FireReport, file_path: &str) -> Result<(), csv::Error> {
    write_csv(report, File::create(file_path)?)
}

/// One `sample` row per probe of every synchronization run, then one `fire`
/// row. Timestamps are Unix milliseconds.
pub fn write_csv<W: io::Write>(report: &FireReport, out: W) -> Result<(), csv::Error> {
    let mut writer = Writer::from_writer(out);
    for sample in &report.samples {
        writer.serialize(ReportRow {
            kind: "sample",
            run: Some(sample.run),
            local_ms: sample.sent_at_ms,
            local_received_ms: Some(sample.received_at_ms),
            authority_ms: sample.server_ms,
            offset_ms: sample.offset_ms,
            remaining_ms: None,
        })?;
    }
    writer.serialize(ReportRow {
        kind: "fire",
        run: None,
        local_ms: report.fired_at.timestamp_millis(),
        local_received_ms: None,
        authority_ms: report.authority_fired_at.timestamp_millis(),
        offset_ms: report.offset.value_ms,
        remaining_ms: report.readiness.map(|r| r.remaining_ms),
    })?;
    writer.flush()?;
    Ok(())
}
