//! Arrow IPC batch sources (file and stream formats).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::{FileReader, StreamReader};
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::source::BatchSource;

/// Batch source over an Arrow IPC file.
///
/// The file format carries a footer indexing every batch, so the source can
/// be rewound to its first batch.
pub struct IpcFileSource {
    /// Path the file was opened from.
    path: PathBuf,
    /// Open reader, `None` once closed.
    reader: Option<FileReader<BufReader<File>>>,
    /// Schema read from the file header.
    schema: SchemaRef,
    /// Batch loaded by the last successful `load_next`.
    current: Option<RecordBatch>,
    /// Number of batches loaded since open or the last rewind.
    loaded: usize,
}

impl IpcFileSource {
    /// Opens an Arrow IPC file and reads its schema.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be opened or its header/footer is malformed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ScanError::Io(format!("failed to open Arrow file {}: {e}", path.display()))
        })?;
        let reader = FileReader::try_new(BufReader::new(file), None).map_err(|e| {
            ScanError::Io(format!("invalid Arrow file {}: {e}", path.display()))
        })?;
        let schema = reader.schema();

        debug!(
            path = %path.display(),
            batches = reader.num_batches(),
            columns = schema.fields().len(),
            "opened Arrow IPC file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            schema,
            current: None,
            loaded: 0,
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of batches recorded in the file footer.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.reader.as_ref().map_or(0, FileReader::num_batches)
    }
}

impl BatchSource for IpcFileSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn load_next(&mut self) -> Result<bool> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ScanError::State("Arrow file source is closed".into()))?;

        self.current = None;
        match reader.next() {
            None => Ok(false),
            Some(Ok(batch)) => {
                self.loaded += 1;
                debug!(
                    batch = self.loaded,
                    rows = batch.num_rows(),
                    "loaded batch from Arrow file"
                );
                self.current = Some(batch);
                Ok(true)
            }
            Some(Err(e)) => Err(ScanError::Io(format!(
                "failed to read batch {} of {}: {e}",
                self.loaded + 1,
                self.path.display()
            ))),
        }
    }

    fn batch(&self) -> Option<&RecordBatch> {
        self.current.as_ref()
    }

    fn is_rewindable(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<()> {
        self.current = None;
        self.loaded = 0;
        match self.reader.as_mut() {
            Some(reader) => reader
                .set_index(0)
                .map_err(|e| ScanError::Io(format!("failed to rewind Arrow file: {e}"))),
            None => {
                // Closed sources reopen from the start.
                let reopened = Self::open(&self.path)?;
                self.reader = reopened.reader;
                Ok(())
            }
        }
    }

    fn close(&mut self) {
        self.current = None;
        self.reader = None;
    }
}

/// Forward-only batch source over any [`RecordBatchReader`], such as the
/// Arrow IPC stream format.
///
/// Truncation is only detected inside a message. Arrow's `StreamReader`
/// reports end of stream when the input ends exactly on a message boundary
/// or within the 4-byte length prefix of the next message, so a stream cut
/// there reads as complete. Prefer [`IpcFileSource`] when the input must be
/// checked for completeness; its footer makes any cut an `Io` error.
pub struct StreamSource {
    reader: Option<Box<dyn RecordBatchReader>>,
    schema: SchemaRef,
    current: Option<RecordBatch>,
    loaded: usize,
}

impl StreamSource {
    /// Reads the Arrow IPC stream format from `input`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the stream's schema message cannot be decoded.
    pub fn ipc<R: Read + 'static>(input: R) -> Result<Self> {
        let reader = StreamReader::try_new(input, None)
            .map_err(|e| ScanError::Io(format!("invalid Arrow stream: {e}")))?;
        Ok(Self::from_batch_reader(Box::new(reader)))
    }

    /// Wraps an existing batch reader.
    #[must_use]
    pub fn from_batch_reader(reader: Box<dyn RecordBatchReader>) -> Self {
        let schema = reader.schema();
        Self {
            reader: Some(reader),
            schema,
            current: None,
            loaded: 0,
        }
    }
}

impl BatchSource for StreamSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn load_next(&mut self) -> Result<bool> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ScanError::State("stream source is closed".into()))?;

        self.current = None;
        match reader.next() {
            None => Ok(false),
            Some(Ok(batch)) => {
                self.loaded += 1;
                debug!(
                    batch = self.loaded,
                    rows = batch.num_rows(),
                    "loaded batch from stream"
                );
                self.current = Some(batch);
                Ok(true)
            }
            Some(Err(e)) => Err(ScanError::Io(format!(
                "failed to read batch {} from stream: {e}",
                self.loaded + 1
            ))),
        }
    }

    fn batch(&self) -> Option<&RecordBatch> {
        self.current.as_ref()
    }

    fn close(&mut self) {
        self.current = None;
        self.reader = None;
    }
}
