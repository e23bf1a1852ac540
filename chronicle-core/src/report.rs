/*!
Report rendering over listed snapshot records.
*/

use crate::record::SnapshotRecord;
use crate::{ChronicleError, Result};
use askama::Template;
use csv::Writer;
use std::fmt;
use std::str::FromStr;

/// Output formats a report can be rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Html,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }

    /// Render `records` in this format
    pub fn render(&self, records: &[SnapshotRecord]) -> Result<String> {
        match self {
            ReportFormat::Html => render_html(records),
            ReportFormat::Json => render_json(records),
            ReportFormat::Csv => render_csv(records),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = ChronicleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(ReportFormat::Html),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(ChronicleError::unsupported_format(format!(
                "Unknown report format: {other}"
            ))),
        }
    }
}

const COLUMNS: [&str; 7] = [
    "id",
    "subject_type",
    "subject_id",
    "label",
    "event_type",
    "created_at",
    "content_hash",
];

fn row(record: &SnapshotRecord) -> [String; 7] {
    [
        record.id.to_string(),
        record.subject_type.clone(),
        record.subject_id.clone(),
        record.label.clone(),
        record.event_type.to_string(),
        record.created_at.to_rfc3339(),
        record.content_hash.clone(),
    ]
}

fn render_json(records: &[SnapshotRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

fn render_csv(records: &[SnapshotRecord]) -> Result<String> {
    let mut wtr = Writer::from_writer(vec![]);

    wtr.write_record(COLUMNS)?;
    for record in records {
        wtr.write_record(row(record))?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| ChronicleError::serialization(format!("CSV writer error: {e}")))?;
    String::from_utf8(data)
        .map_err(|e| ChronicleError::serialization(format!("UTF-8 conversion error: {e}")))
}

/// HTML table of snapshot records; values are escaped by the template engine.
#[derive(Template)]
#[template(path = "report.html")]
struct HtmlReport {
    columns: &'static [&'static str],
    rows: Vec<[String; 7]>,
}

fn render_html(records: &[SnapshotRecord]) -> Result<String> {
    let report = HtmlReport {
        columns: &COLUMNS,
        rows: records.iter().map(row).collect(),
    };
    Ok(report.render()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use crate::record::CaptureMeta;
    use chrono::Utc;
    use serde_json::json;

    fn records() -> Vec<SnapshotRecord> {
        let payload = Payload::from_attributes(json!({"name": "Alice"}).as_object().cloned().unwrap());
        vec![
            SnapshotRecord::assemble(2, "v2, final", &payload, &CaptureMeta::new("app::User", "42"), Utc::now())
                .unwrap(),
            SnapshotRecord::assemble(1, "<b>v1</b>", &payload, &CaptureMeta::new("app::User", "42"), Utc::now())
                .unwrap(),
        ]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("HTML".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!(" csv ".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);

        let err = "pdf".parse::<ReportFormat>().unwrap_err();
        assert!(matches!(err, ChronicleError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_csv_report_quotes_fields() {
        let csv = ReportFormat::Csv.render(&records()).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "id,subject_type,subject_id,label,event_type,created_at,content_hash");
        assert!(lines[1].starts_with("2,app::User,42,\"v2, final\",manual,"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_csv_report_reads_back_with_embedded_quotes() {
        let payload = Payload::from_attributes(json!({"id": 1}).as_object().cloned().unwrap());
        let record = SnapshotRecord::assemble(
            5,
            "say \"hi\"\nthen leave",
            &payload,
            &CaptureMeta::new("app::User", "1"),
            Utc::now(),
        )
        .unwrap();

        let csv = ReportFormat::Csv.render(&[record]).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][3], "say \"hi\"\nthen leave");
        assert_eq!(&rows[0][0], "5");
    }

    #[test]
    fn test_html_report_escapes_values() {
        let html = ReportFormat::Html.render(&records()).unwrap();
        assert!(html.contains("<p>2 snapshot(s)</p>"));
        assert!(html.contains("<th>subject_type</th>"));
        assert_eq!(html.matches("<tr>").count(), 3);
        assert!(html.contains("v1"));
        assert!(!html.contains("<b>v1</b>"));
    }

    #[test]
    fn test_json_report_round_trips() {
        let input = records();
        let json = ReportFormat::Json.render(&input).unwrap();
        let parsed: Vec<SnapshotRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, input);
    }

    #[test]
    fn test_empty_report() {
        let csv = ReportFormat::Csv.render(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
