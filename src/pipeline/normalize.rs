//! Spreadsheet normalisation: replace workbooks with CSV of their first sheet.
//!
//! Only the first worksheet is read; any further sheets are ignored. Cells
//! are written with the `csv` crate's defaults: `,` between fields, `\n`
//! between records, and double-quote escaping for fields that contain a
//! delimiter, a quote or a line break.
//!
//! Workbook parsing is synchronous and CPU-bound, so it runs inside
//! `tokio::task::spawn_blocking`. The CSV is written to a temp file in the
//! same directory and renamed over the target, so a failed conversion never
//! leaves a half-written `.csv` behind.

use crate::error::ExtractError;
use crate::pipeline::scope::{LocalFile, RequestScope};
use calamine::{open_workbook_auto, Data, ExcelDateTime, Reader};
use chrono::NaiveTime;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Canonical content type of converted files.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls"];

/// Whether `file` must be converted before upload.
///
/// True when the declared content type mentions `spreadsheet` or the name
/// ends in `.xlsx` / `.xls` (case-insensitive).
pub fn is_spreadsheet(file: &LocalFile) -> bool {
    if file.content_type.to_ascii_lowercase().contains("spreadsheet") {
        return true;
    }
    [file.path.as_path(), Path::new(&file.original_name)]
        .iter()
        .filter_map(|p| p.extension())
        .any(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            SPREADSHEET_EXTENSIONS.contains(&ext.as_str())
        })
}

/// One completed conversion, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub original: PathBuf,
    pub converted: PathBuf,
}

/// Convert every spreadsheet in the scope, updating the file list in place.
///
/// Non-spreadsheet entries are left untouched. The first failure aborts the
/// whole request; entries already converted stay converted.
pub async fn normalize_files(scope: &mut RequestScope) -> Result<Vec<Conversion>, ExtractError> {
    let mut conversions = Vec::new();

    for idx in 0..scope.files().len() {
        let entry = scope.files()[idx].clone();
        if !is_spreadsheet(&entry) {
            continue;
        }

        let stem = entry
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("upload-{}", idx + 1));
        let target = scope.dir().join(scope.unique_name(&format!("{stem}.csv")));

        let size = convert_to_csv(&entry.path, &target).await?;
        tokio::fs::remove_file(&entry.path)
            .await
            .map_err(|e| ExtractError::storage(&entry.path, e))?;

        info!(
            "Converted {} → {} ({} bytes)",
            entry.path.display(),
            target.display(),
            size
        );

        let slot = &mut scope.files_mut()[idx];
        slot.path = target.clone();
        slot.content_type = CSV_CONTENT_TYPE.to_string();
        slot.size = size;

        conversions.push(Conversion {
            original: entry.path,
            converted: target,
        });
    }

    Ok(conversions)
}

/// Serialise the first sheet of `source` as CSV into `target`.
///
/// Overwrites `target` if it exists. Returns the number of bytes written.
pub async fn convert_to_csv(source: &Path, target: &Path) -> Result<u64, ExtractError> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let csv = first_sheet_to_csv(&source)?;
        write_atomically(&target, &csv)?;
        Ok(csv.len() as u64)
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Conversion task panicked: {e}")))?
}

/// Blocking implementation: open the workbook and render sheet 0.
pub fn first_sheet_to_csv(source: &Path) -> Result<Vec<u8>, ExtractError> {
    let conversion_err = |detail: String| ExtractError::Conversion {
        path: source.to_path_buf(),
        detail,
    };

    let mut workbook = open_workbook_auto(source).map_err(|e| conversion_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| conversion_err("workbook has no sheets".to_string()))?
        .map_err(|e| conversion_err(e.to_string()))?;

    let (rows, cols) = range.get_size();
    debug!("First sheet of {} is {}x{}", source.display(), rows, cols);

    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in range.rows() {
        writer
            .write_record(row.iter().map(cell_to_string))
            .map_err(|e| conversion_err(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| conversion_err(e.to_string()))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::DateTime(dt) => excel_datetime_to_string(dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Date cells render as ISO 8601; midnight values drop the time part.
/// Durations render as `[-]H:MM:SS`. The serial number is kept only when
/// it does not map to a calendar value.
fn excel_datetime_to_string(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        if let Some(d) = dt.as_duration() {
            let secs = d.num_seconds();
            let sign = if secs < 0 { "-" } else { "" };
            let secs = secs.unsigned_abs();
            return format!("{sign}{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        }
    } else if let Some(ndt) = dt.as_datetime() {
        return if ndt.time() == NaiveTime::MIN {
            ndt.format("%Y-%m-%d").to_string()
        } else {
            ndt.format("%Y-%m-%dT%H:%M:%S").to_string()
        };
    }
    dt.as_f64().to_string()
}

fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ExtractError::storage(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::storage(tmp.path(), e))?;
    tmp.persist(target)
        .map_err(|e| ExtractError::storage(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::{ExcelDateTime as XlsxDateTime, Format, Workbook};
    use tempfile::TempDir;

    fn entry(path: &Path, content_type: &str) -> LocalFile {
        LocalFile {
            original_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path: path.to_path_buf(),
            content_type: content_type.to_string(),
            size: 0,
        }
    }

    /// Two sheets; the first has a header row, 3 data rows and 3 columns.
    fn write_invoice_workbook(path: &Path) {
        let mut workbook = Workbook::new();
        {
            let sheet = workbook.add_worksheet();
            let rows: [[&str; 3]; 4] = [
                ["serial", "customer", "note"],
                ["INV-1", "Acme, Inc.", "plain"],
                ["INV-2", "Bob \"The Builder\"", "two\nlines"],
                ["INV-3", "Carol", ""],
            ];
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    if !value.is_empty() {
                        sheet.write(r as u32, c as u16, *value).unwrap();
                    }
                }
            }
        }
        {
            let other = workbook.add_worksheet();
            other.write(0, 0, "ignored-sheet").unwrap();
        }
        workbook.save(path).unwrap();
    }

    #[test]
    fn detection_by_content_type_or_extension() {
        let p = Path::new("/tmp/x/data.XLSX");
        assert!(is_spreadsheet(&entry(p, "application/octet-stream")));
        assert!(is_spreadsheet(&entry(Path::new("/tmp/x/data.xls"), "application/vnd.ms-excel")));
        assert!(is_spreadsheet(&entry(
            Path::new("/tmp/x/blob"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        )));
        assert!(!is_spreadsheet(&entry(Path::new("/tmp/x/a.csv"), "text/csv")));
        assert!(!is_spreadsheet(&entry(Path::new("/tmp/x/a.pdf"), "application/pdf")));
    }

    #[test]
    fn first_sheet_only_with_standard_escaping() {
        let dir = TempDir::new().unwrap();
        let xlsx = dir.path().join("invoices.xlsx");
        write_invoice_workbook(&xlsx);

        let csv = String::from_utf8(first_sheet_to_csv(&xlsx).unwrap()).unwrap();
        assert!(!csv.contains("ignored-sheet"));
        assert!(csv.contains("\"Acme, Inc.\""));
        assert!(csv.contains("\"Bob \"\"The Builder\"\"\""));
        assert!(csv.contains("\"two\nlines\""));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(csv.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 4, "header + 3 data rows");
        assert!(records.iter().all(|r| r.len() == 3));
        assert_eq!(&records[3][2], "");
    }

    #[test]
    fn numbers_render_plainly() {
        let dir = TempDir::new().unwrap();
        let xlsx = dir.path().join("numbers.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write(0, 0, "qty").unwrap();
        sheet.write(0, 1, "price").unwrap();
        sheet.write(1, 0, 3).unwrap();
        sheet.write(1, 1, 2.5).unwrap();
        workbook.save(&xlsx).unwrap();

        let csv = String::from_utf8(first_sheet_to_csv(&xlsx).unwrap()).unwrap();
        assert_eq!(csv, "qty,price\n3,2.5\n");
    }

    #[test]
    fn date_cells_render_as_calendar_dates() {
        let dir = TempDir::new().unwrap();
        let xlsx = dir.path().join("dates.xlsx");
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let stamp_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write(0, 0, "date").unwrap();
        sheet.write(0, 1, "issued").unwrap();
        let day = XlsxDateTime::from_ymd(2024, 3, 1).unwrap();
        let stamp = XlsxDateTime::from_ymd(2024, 3, 1)
            .unwrap()
            .and_hms(14, 30, 5)
            .unwrap();
        sheet.write_datetime_with_format(1, 0, &day, &date_format).unwrap();
        sheet.write_datetime_with_format(1, 1, &stamp, &stamp_format).unwrap();
        workbook.save(&xlsx).unwrap();

        let csv = String::from_utf8(first_sheet_to_csv(&xlsx).unwrap()).unwrap();
        assert_eq!(csv, "date,issued\n2024-03-01,2024-03-01T14:30:05\n");
        assert!(!csv.contains("45352"));
    }

    #[test]
    fn malformed_workbook_is_a_conversion_error() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("broken.xlsx");
        std::fs::write(&bogus, b"this is not a zip archive").unwrap();

        let err = first_sheet_to_csv(&bogus).unwrap_err();
        assert!(matches!(err, ExtractError::Conversion { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn normalize_replaces_spreadsheet_in_place() {
        let root = TempDir::new().unwrap();
        let mut scope = RequestScope::new(root.path());

        let src = TempDir::new().unwrap();
        let xlsx = src.path().join("invoices.xlsx");
        write_invoice_workbook(&xlsx);
        let bytes = std::fs::read(&xlsx).unwrap();

        scope.store("scan.pdf", Some("application/pdf"), b"%PDF-1.4").await.unwrap();
        scope.store("invoices.xlsx", None, &bytes).await.unwrap();

        let conversions = normalize_files(&mut scope).await.unwrap();
        assert_eq!(conversions.len(), 1);

        let files = scope.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].content_type, "application/pdf");
        assert_eq!(files[1].file_name(), "invoices.csv");
        assert_eq!(files[1].content_type, CSV_CONTENT_TYPE);
        assert_eq!(files[1].original_name, "invoices.xlsx");
        assert!(!scope.dir().join("invoices.xlsx").exists());
        assert_eq!(
            std::fs::metadata(&files[1].path).unwrap().len(),
            files[1].size
        );

        let on_disk: Vec<_> = std::fs::read_dir(scope.dir()).unwrap().collect();
        assert_eq!(on_disk.len(), 2, "exactly one artifact per input");
    }

    #[tokio::test]
    async fn converted_name_does_not_clobber_an_uploaded_csv() {
        let root = TempDir::new().unwrap();
        let mut scope = RequestScope::new(root.path());

        let src = TempDir::new().unwrap();
        let xlsx = src.path().join("data.xlsx");
        write_invoice_workbook(&xlsx);

        scope.store("data.csv", Some("text/csv"), b"keep,me\n").await.unwrap();
        scope.store("data.xlsx", None, &std::fs::read(&xlsx).unwrap()).await.unwrap();
        normalize_files(&mut scope).await.unwrap();

        assert_eq!(std::fs::read(&scope.files()[0].path).unwrap(), b"keep,me\n");
        assert_eq!(scope.files()[1].file_name(), "data-1.csv");
    }

    #[tokio::test]
    async fn non_spreadsheets_pass_through_unchanged() {
        let root = TempDir::new().unwrap();
        let mut scope = RequestScope::new(root.path());
        scope.store("invoice.csv", Some("text/csv"), b"a,b\n1,2\n").await.unwrap();
        let before = scope.files().to_vec();

        let conversions = normalize_files(&mut scope).await.unwrap();
        assert!(conversions.is_empty());
        assert_eq!(scope.files(), before.as_slice());
    }
}
