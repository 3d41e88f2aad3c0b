//! Partitioned parquet output.

use std::fs::File;
use std::path::{Path, PathBuf};

use datafusion::arrow::record_batch::RecordBatch;
use datafusion::parquet::arrow::ArrowWriter;
use tidemark_types::SharedState;

use super::{input_table, Step};
use crate::arrow::table_to_batch;
use crate::config::types::{ColumnarFileSinkConfig, WriteMode};
use crate::errors::{PipelineError, Result};

const PARQUET_EXTENSION: &str = "parquet";

/// `part-00000.parquet`, `part-00001.parquet`, ...
#[must_use]
pub fn part_file_name(index: usize) -> String {
    format!("part-{index:05}.{PARQUET_EXTENSION}")
}

/// Row counts per partition; the remainder goes to the earliest parts.
#[must_use]
pub fn partition_sizes(total_rows: usize, parts: usize) -> Vec<usize> {
    let parts = parts.max(1);
    let base = total_rows / parts;
    let remainder = total_rows % parts;
    (0..parts).map(|i| base + usize::from(i < remainder)).collect()
}

fn is_parquet(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARQUET_EXTENSION)
}

fn part_index(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("part-")?
        .parse()
        .ok()
}

/// Writes a state table as N parquet files sharing one schema.
pub struct ColumnarFileSinkStep {
    config: ColumnarFileSinkConfig,
    directory: PathBuf,
}

impl ColumnarFileSinkStep {
    /// `directory` is the configured output directory already resolved to the project root.
    pub fn new(config: ColumnarFileSinkConfig, directory: PathBuf) -> Self {
        Self { config, directory }
    }

    /// Removes existing parquet files on overwrite; on append returns the
    /// first free part index.
    fn prepare_directory(&self) -> Result<usize> {
        let io_err = |e| PipelineError::io(&self.directory, e);
        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory).map_err(io_err)?;
            return Ok(0);
        }

        let mut next_index = 0;
        for entry in std::fs::read_dir(&self.directory).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !is_parquet(&path) {
                continue;
            }
            match self.config.write_mode {
                WriteMode::Overwrite => {
                    std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
                }
                WriteMode::Append => {
                    if let Some(index) = part_index(&path) {
                        next_index = next_index.max(index + 1);
                    }
                }
            }
        }
        Ok(next_index)
    }

    fn write_part(path: &Path, batch: &RecordBatch) -> Result<()> {
        let parquet_err = |source| PipelineError::Parquet {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).map_err(parquet_err)?;
        writer.write(batch).map_err(parquet_err)?;
        writer.close().map_err(parquet_err)?;
        Ok(())
    }
}

impl Step for ColumnarFileSinkStep {
    fn kind(&self) -> &'static str {
        "ColumnarFileSink"
    }

    fn execute(&self, state: SharedState) -> Result<SharedState> {
        let table = input_table(&state, &self.config.source)?;
        let batch = table_to_batch(table)?;
        let first_index = self.prepare_directory()?;

        let mut offset = 0;
        for (i, rows) in partition_sizes(batch.num_rows(), self.config.partitions())
            .into_iter()
            .enumerate()
        {
            let path = self.directory.join(part_file_name(first_index + i));
            Self::write_part(&path, &batch.slice(offset, rows))?;
            offset += rows;
        }

        tracing::info!(
            source = %self.config.source,
            directory = %self.directory.display(),
            parts = self.config.partitions(),
            rows = table.len(),
            "parquet written"
        );
        Ok(state)
    }
}
