use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use log::{info, warn};
use tempfile::NamedTempFile;

pub const COLUMNS: [&str; 9] = [
    "session_id",
    "start_time",
    "end_time",
    "duration_minutes",
    "project",
    "goal",
    "session_type",
    "status",
    "auto_closed",
];

/// Header plus raw rows. Rows stay as bytes so a rewrite writes back
/// anything this process cannot parse, invalid UTF-8 included.
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: ByteRecord,
    pub rows: Vec<ByteRecord>,
}

impl Table {
    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|header| header_is(header, name))
            .ok_or_else(|| anyhow!("session log has no '{name}' column"))
    }

    pub fn field<'a>(&self, row: &'a ByteRecord, name: &str) -> Result<&'a str> {
        let index = self.column(name)?;
        let raw = row.get(index).unwrap_or(b"");
        std::str::from_utf8(raw).with_context(|| format!("'{name}' is not valid UTF-8"))
    }
}

fn header_is(header: &[u8], name: &str) -> bool {
    std::str::from_utf8(header).is_ok_and(|header| header.trim() == name)
}

/// Owns the session log file. Only the log worker thread holds one.
pub struct CsvLog {
    path: PathBuf,
    offset: FixedOffset,
    headers: ByteRecord,
}

impl CsvLog {
    pub fn open(path: PathBuf, offset: FixedOffset) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create session log directory {}", parent.display())
            })?;
        }

        let is_empty = match fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        if is_empty {
            let headers = ByteRecord::from(COLUMNS.to_vec());
            write_atomically(&path, &headers, &[])?;
            info!("Initialized session log at {}", path.display());
            return Ok(Self {
                path,
                offset,
                headers,
            });
        }

        let headers = read_headers(&path)?;
        for column in COLUMNS {
            if !headers.iter().any(|header| header_is(header, column)) {
                bail!(
                    "session log {} is missing required column '{column}'",
                    path.display()
                );
            }
        }
        if headers.len() != COLUMNS.len() {
            warn!(
                "Session log {} has {} columns; extra columns are preserved",
                path.display(),
                headers.len()
            );
        }

        Ok(Self {
            path,
            offset,
            headers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    /// Appends one row given as `(column, value)` pairs, laid out in the
    /// file's own header order.
    pub fn append(&mut self, values: &[(&str, String)]) -> Result<()> {
        let record = self.layout(values);

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {} for append", self.path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(&record)
            .with_context(|| "failed to append session row")?;
        let file = writer
            .into_inner()
            .map_err(|err| anyhow!("failed to flush session row: {}", err.error()))?;
        file.sync_data()
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        Ok(())
    }

    /// Reads every row verbatim. Any row the reader cannot even split is an
    /// error, since a later rewrite would otherwise drop it.
    pub fn read_table(&self) -> Result<Table> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let headers = reader.byte_headers()?.clone();

        let mut rows = Vec::new();
        for (index, record) in reader.byte_records().enumerate() {
            let record = record.with_context(|| {
                format!(
                    "unreadable row {} in {}",
                    index + 2,
                    self.path.display()
                )
            })?;
            rows.push(record);
        }

        Ok(Table { headers, rows })
    }

    /// Replaces the whole file: temp file in the same directory, fsync, rename.
    pub fn rewrite(&mut self, table: &Table) -> Result<()> {
        write_atomically(&self.path, &table.headers, &table.rows)?;
        self.headers = table.headers.clone();
        Ok(())
    }

    fn layout(&self, values: &[(&str, String)]) -> ByteRecord {
        let fields: Vec<&str> = self
            .headers
            .iter()
            .map(|header| {
                values
                    .iter()
                    .find(|(name, _)| header_is(header, name))
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("")
            })
            .collect();
        ByteRecord::from(fields)
    }
}

fn read_headers(path: &Path) -> Result<ByteRecord> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(reader.byte_headers()?.clone())
}

fn write_atomically(path: &Path, headers: &ByteRecord, rows: &[ByteRecord]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;

    let mut writer = WriterBuilder::new().has_headers(false).from_writer(tmp);
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let mut tmp = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush session log: {}", err.error()))?;

    tmp.flush()
        .with_context(|| format!("failed to flush temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| anyhow!("failed to replace {}: {}", path.display(), err.error))?;
    Ok(())
}
