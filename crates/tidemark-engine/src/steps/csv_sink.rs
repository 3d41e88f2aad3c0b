//! Delimited text output.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use tidemark_types::value::DATE_FORMAT;
use tidemark_types::{SharedState, Table};

use super::{input_table, Step};
use crate::config::types::{CsvSinkConfig, LineEnding, WriteMode};
use crate::errors::{PipelineError, Result};

/// Writes a state table as RFC 4180 CSV.
pub struct CsvSinkStep {
    config: CsvSinkConfig,
    path: PathBuf,
}

/// Substitute `{row_count}`, `{date}` and `{timestamp}` in a trailer format.
#[must_use]
pub fn render_trailer(
    format: &str,
    row_count: usize,
    date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> String {
    let date = date.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default();
    format
        .replace("{row_count}", &row_count.to_string())
        .replace("{date}", &date)
        .replace("{timestamp}", &now.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

impl CsvSinkStep {
    /// `path` is the configured output file already resolved to the project root.
    pub fn new(config: CsvSinkConfig, path: PathBuf) -> Self {
        Self { config, path }
    }

    fn open(&self) -> Result<(File, bool)> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let io_err = |e| PipelineError::io(&self.path, e);
        match self.config.write_mode {
            WriteMode::Overwrite => Ok((File::create(&self.path).map_err(io_err)?, false)),
            WriteMode::Append => {
                let has_content = std::fs::metadata(&self.path).is_ok_and(|m| m.len() > 0);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(io_err)?;
                Ok((file, has_content))
            }
        }
    }

    fn write_table(&self, table: &Table, max_date: Option<NaiveDate>) -> Result<()> {
        let (file, appending) = self.open()?;
        let terminator = match self.config.line_ending {
            LineEnding::Lf => Terminator::Any(b'\n'),
            LineEnding::Crlf => Terminator::CRLF,
        };
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Necessary)
            .terminator(terminator)
            .from_writer(file);

        let csv_err = |e: csv::Error| PipelineError::io(&self.path, e.into());

        let line_ending = self.config.line_ending.as_str().as_bytes();
        let io_err = |e| PipelineError::io(&self.path, e);

        if self.config.include_header && !appending {
            write_fields(&mut writer, table.columns(), line_ending).map_err(csv_err)?;
        }
        for row in table.rows() {
            let fields: Vec<String> =
                table.columns().iter().map(|c| row.get(c).to_string()).collect();
            write_fields(&mut writer, &fields, line_ending).map_err(csv_err)?;
        }

        let mut file = writer
            .into_inner()
            .map_err(|e| PipelineError::io(&self.path, e.into_error()))?;

        if let Some(format) = &self.config.trailer_format {
            let trailer = render_trailer(format, table.len(), max_date, Utc::now());
            file.write_all(trailer.as_bytes())
                .and_then(|()| file.write_all(line_ending))
                .map_err(io_err)?;
        }
        file.flush().map_err(io_err)
    }
}

/// Write one record. The csv writer quotes a lone empty field as `""`;
/// a single-column null or empty value is written as a blank line instead.
fn write_fields<S: AsRef<[u8]>>(
    writer: &mut csv::Writer<File>,
    fields: &[S],
    line_ending: &[u8],
) -> csv::Result<()> {
    match fields {
        [only] if only.as_ref().is_empty() => {
            writer.flush()?;
            (&*writer.get_ref()).write_all(line_ending)?;
            Ok(())
        }
        _ => writer.write_record(fields),
    }
}

impl Step for CsvSinkStep {
    fn kind(&self) -> &'static str {
        "CsvSink"
    }

    fn execute(&self, state: SharedState) -> Result<SharedState> {
        let table = input_table(&state, &self.config.source)?;
        self.write_table(table, state.max_effective_date())?;
        tracing::info!(
            source = %self.config.source,
            path = %self.path.display(),
            rows = table.len(),
            "csv written"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tidemark_types::Value;

    fn config(mode: WriteMode) -> CsvSinkConfig {
        CsvSinkConfig {
            source: "out".into(),
            output_file: PathBuf::from("ignored.csv"),
            include_header: true,
            trailer_format: None,
            write_mode: mode,
            line_ending: LineEnding::Lf,
        }
    }

    fn state() -> SharedState {
        let table = Table::from_rows(
            ["id", "name", "note"],
            vec![
                vec![Value::Int32(1), Value::from("Smith, J"), Value::Null],
                vec![Value::Int32(2), Value::from("say \"hi\""), Value::from("ok")],
            ],
        )
        .unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 8, 9).unwrap();
        let mut state = SharedState::for_effective_range(d, d);
        state.insert_table("out", table);
        state
    }

    #[test]
    fn quotes_only_when_needed_and_nulls_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        CsvSinkStep::new(config(WriteMode::Overwrite), path.clone())
            .execute(state())
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "id,name,note\n1,\"Smith, J\",\n2,\"say \"\"hi\"\"\",ok\n"
        );
    }

    #[test]
    fn append_suppresses_header_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let step = CsvSinkStep::new(config(WriteMode::Append), path.clone());
        let state = step.execute(state()).unwrap();
        step.execute(state).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("id,name,note").count(), 1);
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn trailer_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut cfg = config(WriteMode::Overwrite);
        cfg.include_header = false;
        cfg.line_ending = LineEnding::Crlf;
        cfg.trailer_format = Some("TRAILER|{row_count}|{date}".into());
        CsvSinkStep::new(cfg, path.clone()).execute(state()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("1,\"Smith, J\",\r\n"));
        assert!(text.ends_with("TRAILER|2|2024-08-09\r\n"));
    }

    #[test]
    fn single_column_nulls_render_as_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let table = Table::from_rows(
            ["note"],
            vec![vec![Value::Null], vec![Value::from("x")], vec![Value::from("")]],
        )
        .unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 8, 9).unwrap();
        let mut state = SharedState::for_effective_range(d, d);
        state.insert_table("out", table);

        let mut cfg = config(WriteMode::Overwrite);
        cfg.trailer_format = Some("T|{row_count}".into());
        CsvSinkStep::new(cfg, path.clone()).execute(state).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "note\n\nx\n\nT|3\n");
    }

    #[test]
    fn trailer_tokens() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            render_trailer("{row_count};{date};{timestamp}", 7, None, now),
            "7;;2024-01-02T03:04:05Z"
        );
    }
}
