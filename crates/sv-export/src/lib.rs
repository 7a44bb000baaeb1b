//! Delimited text exports of visit records.
//!
//! Both formats share one column order and a header row. CSV output always
//! quotes the free-text columns (contractor name, company, job type,
//! description), quotes any other field only when it needs it, and doubles
//! embedded quotes. Tab-delimited output never quotes and flattens tabs and
//! line breaks inside a field to spaces.

use std::fmt;
use std::str::FromStr;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use thiserror::Error;
use tracing::debug;

use sv_core::VisitRecord;
use sv_utils::flatten_field;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Errors raised while rendering an export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The delimited writer rejected a record.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Flushing the in-memory buffer failed.
    #[error("flush error: {0}")]
    Flush(String),
    /// The rendered bytes were not valid UTF-8.
    #[error("encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    /// An unknown format name was requested.
    #[error("unknown export format: {0}")]
    UnknownFormat(String),
}

/// Header titles, in column order.
pub const COLUMNS: [&str; 13] = [
    "ID",
    "Contractor Name",
    "Company",
    "Job Type",
    "Description",
    "Date",
    "Time In",
    "Time Out",
    "Status",
    "Recurrence",
    "Next Scheduled",
    "Contact Email",
    "Contact Phone",
];

/// Supported export formats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values.
    #[default]
    Csv,
    /// Tab-separated values for spreadsheet tools.
    Tsv,
}

impl ExportFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }

    /// File name used when the caller gives none.
    pub fn default_file_name(self) -> String {
        format!("contractor-visits.{}", self.extension())
    }

    /// MIME type of the artifact.
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Tsv => "text/tab-separated-values; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> ExportResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" | "tab" | "excel" => Ok(ExportFormat::Tsv),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Column indexes that CSV output always wraps in quotes.
const QUOTED_COLUMNS: [usize; 4] = [1, 2, 3, 4];

fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn quoted_if_needed(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        quoted(field)
    } else {
        field.to_string()
    }
}

fn row(visit: &VisitRecord) -> [String; 13] {
    [
        visit.id.to_string(),
        visit.contractor_name.clone(),
        visit.company.clone(),
        visit.job_type.clone(),
        visit.description.clone(),
        visit.date.format("%Y-%m-%d").to_string(),
        visit.time_in.to_string(),
        visit.time_out.to_string(),
        visit.status.label().to_string(),
        visit.recurrence.label().to_string(),
        visit
            .next_scheduled
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        visit.contact_email.clone(),
        visit.contact_phone.clone(),
    ]
}

/// Render `visits` as comma-separated text.
pub fn export_csv(visits: &[VisitRecord]) -> ExportResult<String> {
    // Quoting is decided per column, so the writer itself never quotes.
    let builder = {
        let mut builder = WriterBuilder::new();
        builder
            .delimiter(b',')
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'));
        builder
    };
    write_rows(&builder, visits, |mut fields| {
        for (index, field) in fields.iter_mut().enumerate() {
            *field = if QUOTED_COLUMNS.contains(&index) {
                quoted(field)
            } else {
                quoted_if_needed(field)
            };
        }
        fields
    })
}

/// Render `visits` as tab-separated text.
pub fn export_delimited(visits: &[VisitRecord]) -> ExportResult<String> {
    let builder = {
        let mut builder = WriterBuilder::new();
        builder
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'));
        builder
    };
    write_rows(&builder, visits, |fields| {
        fields.map(|field| flatten_field(&field))
    })
}

/// Render `visits` in `format`.
pub fn export(visits: &[VisitRecord], format: ExportFormat) -> ExportResult<String> {
    match format {
        ExportFormat::Csv => export_csv(visits),
        ExportFormat::Tsv => export_delimited(visits),
    }
}

fn write_rows<F>(builder: &WriterBuilder, visits: &[VisitRecord], prepare: F) -> ExportResult<String>
where
    F: Fn([String; 13]) -> [String; 13],
{
    let mut writer = builder.from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for visit in visits {
        writer.write_record(prepare(row(visit)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Flush(err.error().to_string()))?;
    debug!(rows = visits.len(), bytes = bytes.len(), "export rendered");
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_core::{parse_date, NewVisit, TimeOfDay, VisitId};

    fn visit(description: &str) -> VisitRecord {
        let new = NewVisit::new(
            "Mike Johnson",
            "CoolAir HVAC",
            "HVAC Maintenance",
            description,
            parse_date("2025-03-05").unwrap(),
            TimeOfDay::from_hm(9, 0).unwrap(),
            TimeOfDay::from_hm(11, 30).unwrap(),
            "mike@coolair.test",
            "555-0101",
        )
        .unwrap();
        VisitRecord::from_new(VisitId::new("1"), new)
    }

    #[test]
    fn csv_snapshot() {
        let mut second = visit("Quarterly filter change");
        second.id = VisitId::new("2");
        second.next_scheduled = Some(parse_date("2025-06-05").unwrap());
        let output = export_csv(&[visit("needs A/C, filter"), second]).unwrap();
        insta::assert_snapshot!(output, @r###"
        ID,Contractor Name,Company,Job Type,Description,Date,Time In,Time Out,Status,Recurrence,Next Scheduled,Contact Email,Contact Phone
        1,"Mike Johnson","CoolAir HVAC","HVAC Maintenance","needs A/C, filter",2025-03-05,09:00,11:30,Scheduled,One-time,,mike@coolair.test,555-0101
        2,"Mike Johnson","CoolAir HVAC","HVAC Maintenance","Quarterly filter change",2025-03-05,09:00,11:30,Scheduled,One-time,2025-06-05,mike@coolair.test,555-0101
        "###);
    }

    #[test]
    fn csv_comma_survives_parsing() {
        let output = export_csv(&[visit("needs A/C, filter")]).unwrap();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(output.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), COLUMNS.len());
        assert_eq!(&records[0][4], "needs A/C, filter");
    }

    #[test]
    fn csv_doubles_embedded_quotes() {
        let mut record = visit("swap the \"old\" unit");
        record.contractor_name = "Dan \"The Man\" Ortiz".into();
        let output = export_csv(&[record]).unwrap();
        assert!(output.contains("\"Dan \"\"The Man\"\" Ortiz\""));
        assert!(output.contains("\"swap the \"\"old\"\" unit\""));
    }

    #[test]
    fn csv_quotes_other_columns_only_when_needed() {
        let mut record = visit("plain");
        record.contact_phone = "555-0101, ext 2".into();
        let output = export_csv(&[record]).unwrap();
        let line = output.lines().nth(1).unwrap();
        assert!(line.starts_with("1,\"Mike Johnson\","));
        assert!(line.ends_with(",mike@coolair.test,\"555-0101, ext 2\""));
        assert!(line.contains(",\"plain\",2025-03-05,09:00,"));

        let mut reader = csv::Reader::from_reader(output.as_bytes());
        let parsed = reader.records().next().unwrap().unwrap();
        assert_eq!(parsed.len(), COLUMNS.len());
        assert_eq!(&parsed[12], "555-0101, ext 2");
    }

    #[test]
    fn csv_of_empty_collection_is_header_only() {
        let output = export_csv(&[]).unwrap();
        assert_eq!(output, format!("{}\n", COLUMNS.join(",")));
    }

    #[test]
    fn tsv_snapshot() {
        let output = export_delimited(&[visit("needs A/C, filter")]).unwrap();
        let expected = format!(
            "{}\n1\tMike Johnson\tCoolAir HVAC\tHVAC Maintenance\tneeds A/C, filter\t2025-03-05\t09:00\t11:30\tScheduled\tOne-time\t\tmike@coolair.test\t555-0101\n",
            COLUMNS.join("\t")
        );
        assert_eq!(output, expected);
    }

    #[test]
    fn tsv_keeps_rows_on_one_line() {
        let output = export_delimited(&[visit("line one\nline\ttwo \"quoted\"")]).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].split('\t').count(), COLUMNS.len());
        assert!(lines[1].contains("line one line two \"quoted\""));
    }

    #[test]
    fn export_is_reproducible() {
        let visits = [visit("a"), visit("b")];
        assert_eq!(
            export(&visits, ExportFormat::Csv).unwrap(),
            export(&visits, ExportFormat::Csv).unwrap()
        );
    }

    #[test]
    fn format_names() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Tsv);
        assert!("xlsx".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Csv.default_file_name(), "contractor-visits.csv");
        assert_eq!(ExportFormat::Tsv.default_file_name(), "contractor-visits.tsv");
    }
}
