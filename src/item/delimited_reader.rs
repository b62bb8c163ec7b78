//! # Delimited File Reader
//!
//! Restartable [`ItemReader`] over a delimited text file, built on the `csv`
//! crate's record reader.
//!
//! ## Key Features
//!
//! - **Header handling**: the first `lines_to_skip` lines are skipped; when no
//!   column names are configured the first skipped line supplies them
//! - **Streaming**: the file is pulled in batches of lines on the blocking
//!   thread pool as the pipeline asks for records, never loaded whole
//! - **Restart positioning**: the number of data lines consumed is saved under
//!   `<reader name>.read.count` after each commit and skipped again on reopen
//! - **Per-line errors**: a malformed line or a wrong field count is an
//!   [`ItemErrorKind::Invalid`](super::ItemErrorKind::Invalid) error for that line
//!   only, so the skip policy can decide and the next `read` continues

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{FieldSet, FieldSetMapper, ItemError, ItemReader, ItemResult};
use crate::constants::READ_COUNT_SUFFIX;
use crate::models::ExecutionContext;

/// Lines pulled from the file per blocking read
const BUFFERED_LINES: usize = 256;

type LineReader = csv::Reader<File>;
type LineResult = csv::Result<csv::StringRecord>;

fn join_error(e: tokio::task::JoinError) -> ItemError {
    ItemError::fatal(format!("file reader task aborted: {e}"))
}

pub struct DelimitedItemReader<T> {
    name: String,
    path: PathBuf,
    delimiter: u8,
    lines_to_skip: usize,
    names: Option<Arc<[String]>>,
    mapper: Arc<dyn FieldSetMapper<T>>,
    save_state: bool,
    records: Option<LineReader>,
    pending: VecDeque<LineResult>,
    exhausted: bool,
    position: u64,
}

impl<T> std::fmt::Debug for DelimitedItemReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedItemReader")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("position", &self.position)
            .field("buffered", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<T> DelimitedItemReader<T> {
    pub fn builder() -> DelimitedItemReaderBuilder<T> {
        DelimitedItemReaderBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data lines consumed so far, including ones that failed to parse
    pub fn position(&self) -> u64 {
        self.position
    }

    fn position_key(&self) -> String {
        format!("{}{READ_COUNT_SUFFIX}", self.name)
    }

    /// Pull the next batch of lines off the file on the blocking pool
    async fn fill(&mut self) -> ItemResult<()> {
        let mut records = self
            .records
            .take()
            .ok_or_else(|| ItemError::fatal(format!("{} read before open", self.name)))?;

        let (records, lines, exhausted) = tokio::task::spawn_blocking(move || {
            let mut lines = VecDeque::with_capacity(BUFFERED_LINES);
            let mut exhausted = false;
            while lines.len() < BUFFERED_LINES {
                let mut line = csv::StringRecord::new();
                match records.read_record(&mut line) {
                    Ok(true) => lines.push_back(Ok(line)),
                    Ok(false) => {
                        exhausted = true;
                        break;
                    }
                    Err(e) => {
                        // an I/O failure ends the file; a parse failure is one bad line
                        let broken = matches!(e.kind(), csv::ErrorKind::Io(_));
                        lines.push_back(Err(e));
                        if broken {
                            exhausted = true;
                            break;
                        }
                    }
                }
            }
            (records, lines, exhausted)
        })
        .await
        .map_err(join_error)?;

        self.records = Some(records);
        self.pending = lines;
        self.exhausted = exhausted;
        Ok(())
    }
}

/// Open `path`, skip the header lines and the lines consumed before a restart
fn position_reader(
    path: &Path,
    delimiter: u8,
    lines_to_skip: usize,
    restart_at: u64,
) -> ItemResult<(LineReader, Option<Vec<String>>, u64)> {
    let mut records = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| ItemError::fatal(format!("cannot open {}: {e}", path.display())))?;

    let mut header = None;
    let mut line = csv::StringRecord::new();
    for skipped in 0..lines_to_skip {
        let more = records.read_record(&mut line).map_err(|e| {
            ItemError::fatal(format!("unreadable header in {}: {e}", path.display()))
        })?;
        if !more {
            break;
        }
        if skipped == 0 {
            header = Some(line.iter().map(|s| s.trim().to_string()).collect());
        }
    }

    let mut consumed = 0;
    while consumed < restart_at {
        match records.read_record(&mut line) {
            Ok(false) => break,
            // lines that failed before the restart were already accounted for
            Ok(true) | Err(_) => consumed += 1,
        }
    }
    Ok((records, header, consumed))
}

#[async_trait]
impl<T: Send + 'static> ItemReader<T> for DelimitedItemReader<T> {
    async fn open(&mut self, context: &ExecutionContext) -> ItemResult<()> {
        let restart_at = if self.save_state {
            context
                .get_long(&self.position_key())
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(0)
        } else {
            0
        };

        let path = self.path.clone();
        let (delimiter, lines_to_skip) = (self.delimiter, self.lines_to_skip);
        let (records, header, consumed) = tokio::task::spawn_blocking(move || {
            position_reader(&path, delimiter, lines_to_skip, restart_at)
        })
        .await
        .map_err(join_error)??;

        if self.names.is_none() {
            self.names = header.map(Into::into);
        }
        if self.names.is_none() {
            return Err(ItemError::fatal(format!(
                "{}: no column names configured and no header line",
                self.name
            )));
        }

        self.position = consumed;
        self.records = Some(records);
        self.pending.clear();
        self.exhausted = false;

        debug!(
            reader = %self.name,
            path = %self.path.display(),
            position = self.position,
            "Opened delimited reader"
        );
        Ok(())
    }

    async fn read(&mut self) -> ItemResult<Option<T>> {
        if self.pending.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        let Some(names) = self.names.as_ref() else {
            return Err(ItemError::fatal(format!("{} read before open", self.name)));
        };

        let line = match self.pending.pop_front() {
            None => return Ok(None),
            Some(Err(e)) => {
                self.position += 1;
                return Err(e.into());
            }
            Some(Ok(line)) => line,
        };
        self.position += 1;

        if line.len() != names.len() {
            let line_number = line.position().map(|p| p.line()).unwrap_or_default();
            return Err(ItemError::invalid(format!(
                "{}: line {line_number} has {} fields, expected {}",
                self.name,
                line.len(),
                names.len()
            )));
        }

        let field_set = FieldSet::new(
            Arc::clone(names),
            line.iter().map(str::to_string).collect(),
        );
        self.mapper.map_field_set(&field_set).map(Some)
    }

    fn update(&self, context: &mut ExecutionContext) {
        if self.save_state {
            context.put_long(self.position_key(), self.position as i64);
        }
    }

    async fn close(&mut self) -> ItemResult<()> {
        self.records = None;
        self.pending.clear();
        self.exhausted = false;
        Ok(())
    }
}

pub struct DelimitedItemReaderBuilder<T> {
    name: Option<String>,
    path: Option<PathBuf>,
    delimiter: char,
    lines_to_skip: usize,
    names: Vec<String>,
    mapper: Option<Arc<dyn FieldSetMapper<T>>>,
    save_state: bool,
}

impl<T> Default for DelimitedItemReaderBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelimitedItemReaderBuilder<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            path: None,
            delimiter: ',',
            lines_to_skip: 0,
            names: Vec::new(),
            mapper: None,
            save_state: true,
        }
    }

    /// Name used as the execution context key prefix
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn lines_to_skip(mut self, lines: usize) -> Self {
        self.lines_to_skip = lines;
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn field_set_mapper(mut self, mapper: impl FieldSetMapper<T> + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    pub fn shared_mapper(mut self, mapper: Arc<dyn FieldSetMapper<T>>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Persist the read position for restart (default true)
    pub fn save_state(mut self, save_state: bool) -> Self {
        self.save_state = save_state;
        self
    }

    pub fn build(self) -> ItemResult<DelimitedItemReader<T>> {
        let name = self
            .name
            .ok_or_else(|| ItemError::fatal("delimited reader requires a name"))?;
        let path = self
            .path
            .ok_or_else(|| ItemError::fatal(format!("{name}: no input path")))?;
        let mapper = self
            .mapper
            .ok_or_else(|| ItemError::fatal(format!("{name}: no field set mapper")))?;
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ItemError::fatal(format!("{name}: delimiter '{}' is not ASCII", self.delimiter))
            })?;

        Ok(DelimitedItemReader {
            name,
            path,
            delimiter,
            lines_to_skip: self.lines_to_skip,
            names: (!self.names.is_empty()).then(|| self.names.into()),
            mapper,
            save_state: self.save_state,
            records: None,
            pending: VecDeque::new(),
            exhausted: false,
            position: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemErrorKind, Record, RecordMapper, FieldSpec, FieldType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DOGS: &str = "id,name,gender\n1,Rex,M\n2,Fido,F\n3,Lassie,F\n";

    fn file_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn reader(path: &Path) -> DelimitedItemReader<Record> {
        DelimitedItemReader::builder()
            .name("dogReader")
            .path(path)
            .lines_to_skip(1)
            .field_set_mapper(RecordMapper::new(
                vec![
                    FieldSpec::new("id", FieldType::Long),
                    FieldSpec::new("name", FieldType::String),
                    FieldSpec::new("gender", FieldType::Char),
                ],
                "%Y-%m-%d",
            ))
            .build()
            .unwrap()
    }

    async fn drain(reader: &mut DelimitedItemReader<Record>) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(record) = reader.read().await.unwrap() {
            ids.push(record.get_long("id").unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_reads_using_header_names() {
        let file = file_with(DOGS);
        let mut reader = reader(file.path());
        reader.open(&ExecutionContext::new()).await.unwrap();
        assert_eq!(drain(&mut reader).await, vec![1, 2, 3]);
        assert_eq!(reader.position(), 3);
    }

    #[tokio::test]
    async fn test_restart_resumes_after_saved_position() {
        let file = file_with(DOGS);
        let mut first = reader(file.path());
        first.open(&ExecutionContext::new()).await.unwrap();
        first.read().await.unwrap();
        first.read().await.unwrap();

        let mut context = ExecutionContext::new();
        first.update(&mut context);
        assert_eq!(context.get_long("dogReader.read.count"), Some(2));

        let mut second = reader(file.path());
        second.open(&context).await.unwrap();
        assert_eq!(drain(&mut second).await, vec![3]);
    }

    #[tokio::test]
    async fn test_wrong_field_count_is_invalid_and_reader_continues() {
        let file = file_with("id,name,gender\n1,Rex,M\n2,Fido\n3,Lassie,F\n");
        let mut reader = reader(file.path());
        reader.open(&ExecutionContext::new()).await.unwrap();

        assert!(reader.read().await.unwrap().is_some());
        let err = reader.read().await.unwrap_err();
        assert_eq!(err.kind, ItemErrorKind::Invalid);
        assert!(err.message.contains("line 3"));
        let third = reader.read().await.unwrap().unwrap();
        assert_eq!(third.get_long("id"), Some(3));
        assert_eq!(reader.position(), 3);
    }

    #[tokio::test]
    async fn test_configured_names_and_delimiter() {
        let file = file_with("7|Rex|M\n");
        let mut reader: DelimitedItemReader<Record> = DelimitedItemReader::builder()
            .name("pipeReader")
            .path(file.path())
            .delimiter('|')
            .names(["id", "name", "gender"])
            .field_set_mapper(|fs: &FieldSet| {
                Ok(Record::new().with("id", crate::item::FieldValue::Long(fs.read_i64("id")?)))
            })
            .build()
            .unwrap();
        reader.open(&ExecutionContext::new()).await.unwrap();
        assert_eq!(drain(&mut reader).await, vec![7]);
    }

    #[tokio::test]
    async fn test_long_file_streams_across_batches_and_restarts() {
        let mut content = String::from("id,name,gender\n");
        for id in 1..=1000 {
            content.push_str(&format!("{id},dog {id},M\n"));
        }
        let file = file_with(&content);

        let mut context = ExecutionContext::new();
        context.put_long("dogReader.read.count", 600);
        let mut reader = reader(file.path());
        reader.open(&context).await.unwrap();

        let ids = drain(&mut reader).await;
        assert_eq!(ids, (601..=1000).collect::<Vec<_>>());
        assert_eq!(reader.position(), 1000);
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_before_open_is_fatal() {
        let file = file_with(DOGS);
        let mut reader = reader(file.path());
        let err = reader.read().await.unwrap_err();
        assert_eq!(err.kind, ItemErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let mut reader = reader(Path::new("/nonexistent/dogs.csv"));
        let err = reader.open(&ExecutionContext::new()).await.unwrap_err();
        assert_eq!(err.kind, ItemErrorKind::Fatal);
    }
}
