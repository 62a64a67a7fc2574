//! Export of the current ledger view as delimited text or a paginated report.

use crate::ledger::LedgerRow;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_DELIMITER: char = ',';
pub const DEFAULT_PAGE_LINES: usize = 40;
pub const DEFAULT_CSV_FILE: &str = "transactions.csv";
pub const DEFAULT_REPORT_FILE: &str = "transactions.txt";

const HEADERS: [&str; 5] = ["ID", "Counterparty", "Date", "Status", "Amount"];
const REPORT_TITLE: &str = "Peer2Paisa Transaction Report";
const FORM_FEED: char = '\u{0C}';

// Column widths for the printable report
const W_ID: usize = 8;
const W_PARTY: usize = 30;
const W_DATE: usize = 14;
const W_STATUS: usize = 12;
const W_AMOUNT: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Nothing to export")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Delimited,
    Report,
}

impl ExportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "csv" | "text" | "delimited" => Some(Self::Delimited),
            "report" | "pdf" | "print" => Some(Self::Report),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delimited => "csv",
            Self::Report => "report",
        }
    }

    pub fn default_file(&self) -> &'static str {
        match self {
            Self::Delimited => DEFAULT_CSV_FILE,
            Self::Report => DEFAULT_REPORT_FILE,
        }
    }
}

fn escape_field(value: &str, delimiter: char) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c == delimiter || c == '"' || c == '\n' || c == '\r');
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn fields(row: &LedgerRow) -> [String; 5] {
    [
        row.id.to_string(),
        row.counterparty.clone(),
        row.date.clone(),
        row.status.clone(),
        row.amount.clone(),
    ]
}

/// Header plus one line per row, fields quoted where needed.
pub fn to_delimited_text(rows: &[LedgerRow], delimiter: char) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::Empty);
    }

    let sep = delimiter.to_string();
    let mut out = String::new();
    let header: Vec<String> = HEADERS.iter().map(|h| escape_field(h, delimiter)).collect();
    out.push_str(&header.join(&sep));
    out.push('\n');

    for row in rows {
        let line: Vec<String> = fields(row)
            .iter()
            .map(|f| escape_field(f, delimiter))
            .collect();
        out.push_str(&line.join(&sep));
        out.push('\n');
    }
    Ok(out)
}

fn fit(value: &str, width: usize) -> String {
    let count = value.chars().count();
    if count <= width {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn table_line(cols: [&str; 5]) -> String {
    format!(
        "{:<w0$} {:<w1$} {:<w2$} {:<w3$} {:>w4$}",
        fit(cols[0], W_ID),
        fit(cols[1], W_PARTY),
        fit(cols[2], W_DATE),
        fit(cols[3], W_STATUS),
        fit(cols[4], W_AMOUNT),
        w0 = W_ID,
        w1 = W_PARTY,
        w2 = W_DATE,
        w3 = W_STATUS,
        w4 = W_AMOUNT,
    )
}

/// Fixed-width report. `page_lines` is the number of table rows per page;
/// each page repeats the header block and ends with a page footer.
pub fn to_printable_report(
    rows: &[LedgerRow],
    account_email: &str,
    generated_at: DateTime<Utc>,
    page_lines: usize,
) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::Empty);
    }

    let per_page = page_lines.max(1);
    let chunks: Vec<&[LedgerRow]> = rows.chunks(per_page).collect();
    let total = chunks.len();
    let width = W_ID + W_PARTY + W_DATE + W_STATUS + W_AMOUNT + 4;
    let rule = "-".repeat(width);

    let mut pages = Vec::with_capacity(total);
    for (index, chunk) in chunks.iter().enumerate() {
        let mut page = String::new();
        page.push_str(REPORT_TITLE);
        page.push('\n');
        page.push_str(&format!("Account: {}\n", account_email));
        page.push_str(&format!(
            "Generated: {}\n\n",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        page.push_str(&table_line(HEADERS));
        page.push('\n');
        page.push_str(&rule);
        page.push('\n');
        for row in chunk.iter() {
            let f = fields(row);
            page.push_str(&table_line([&f[0], &f[1], &f[2], &f[3], &f[4]]));
            page.push('\n');
        }
        page.push_str(&rule);
        page.push('\n');
        page.push_str(&format!("Page {} of {}\n", index + 1, total));
        pages.push(page);
    }

    Ok(pages.join(&FORM_FEED.to_string()))
}

pub fn write_document(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn row(id: i64, counterparty: &str, status: &str, amount: &str) -> LedgerRow {
        LedgerRow {
            id,
            counterparty: counterparty.to_string(),
            date: "Mar 5, 2025".to_string(),
            status: status.to_string(),
            amount: amount.to_string(),
        }
    }

    fn read_back(text: &str, delimiter: u8) -> Vec<csv::StringRecord> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes())
            .records()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_delimited_header_and_rows() {
        let rows = vec![row(1, "bob@x.com", "Sent", "-$25.00")];
        let text = to_delimited_text(&rows, ',').unwrap();
        assert_eq!(
            text,
            "ID,Counterparty,Date,Status,Amount\n1,bob@x.com,\"Mar 5, 2025\",Sent,-$25.00\n"
        );
    }

    #[test]
    fn test_delimited_escaping_survives_reader() {
        let rows = vec![
            row(1, "Smith, \"Jr\"", "Received", "+$1.00"),
            row(2, "line\nbreak", "PENDING", "-$2.50"),
        ];
        let text = to_delimited_text(&rows, ',').unwrap();

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        assert_eq!(
            reader.headers().unwrap(),
            vec!["ID", "Counterparty", "Date", "Status", "Amount"]
        );
        let records = read_back(&text, b',');
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "Smith, \"Jr\"");
        assert_eq!(&records[0][2], "Mar 5, 2025");
        assert_eq!(&records[1][1], "line\nbreak");
        assert_eq!(&records[1][4], "-$2.50");
    }

    #[test]
    fn test_custom_delimiter() {
        let rows = vec![
            row(7, "a;b", "Sent", "-$1.00"),
            row(8, "Smith, \"Jr\"", "Received", "+$2.00"),
        ];
        let text = to_delimited_text(&rows, ';').unwrap();
        assert!(text.contains("7;\"a;b\";Mar 5, 2025;Sent;-$1.00"));

        let records = read_back(&text, b';');
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "a;b");
        assert_eq!(&records[1][1], "Smith, \"Jr\"");
        assert_eq!(records[1].len(), 5);
    }

    #[test]
    fn test_empty_collection_is_signalled() {
        let generated = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        assert_eq!(to_delimited_text(&[], ','), Err(ExportError::Empty));
        assert_eq!(
            to_printable_report(&[], "a@x.com", generated, 10),
            Err(ExportError::Empty)
        );
        assert_eq!(ExportError::Empty.to_string(), "Nothing to export");
    }

    #[test]
    fn test_report_pagination() {
        let rows: Vec<LedgerRow> = (1..=5)
            .map(|i| row(i, "bob@x.com", "Sent", "-$1.00"))
            .collect();
        let generated = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        let report = to_printable_report(&rows, "a@x.com", generated, 2).unwrap();

        let pages: Vec<&str> = report.split(FORM_FEED).collect();
        assert_eq!(pages.len(), 3);
        for (i, page) in pages.iter().enumerate() {
            assert!(page.starts_with(REPORT_TITLE));
            assert!(page.contains("Account: a@x.com"));
            assert!(page.contains("Generated: 2025-03-05 12:00:00 UTC"));
            assert!(page.contains(&format!("Page {} of 3", i + 1)));
        }
        assert_eq!(pages[2].matches("bob@x.com").count(), 1);
    }

    #[test]
    fn test_report_columns_fixed_width() {
        let long = "someone.with.a.really.long.address@example.com";
        let rows = vec![row(1, long, "Sent", "-$25.00"), row(22, "b@x.com", "Received", "+$3.00")];
        let generated = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        let report = to_printable_report(&rows, "a@x.com", generated, 40).unwrap();

        let table: Vec<&str> = report
            .lines()
            .filter(|l| l.ends_with("$25.00") || l.ends_with("$3.00"))
            .collect();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].chars().count(), table[1].chars().count());
        assert!(table[0].contains("..."));
        assert!(!table[0].contains(long));
    }

    #[test]
    fn test_write_document_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join(DEFAULT_CSV_FILE);
        write_document(&path, "ID\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "ID\n");
    }

    #[test]
    fn test_export_kind_parse() {
        assert_eq!(ExportKind::parse("csv"), Some(ExportKind::Delimited));
        assert_eq!(ExportKind::parse("report"), Some(ExportKind::Report));
        assert_eq!(ExportKind::parse("xlsx"), None);
        assert_eq!(ExportKind::Report.default_file(), DEFAULT_REPORT_FILE);
    }
}
