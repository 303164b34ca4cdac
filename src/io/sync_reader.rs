//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over the records of one CSV file. The row
//! type decides what the file holds (readings, tank snapshots, tank events);
//! parsing and conversion are delegated to the csv_format module.
//!
//! # Iterator Interface
//!
//! `SyncReader<T>` yields `Result<T::Record, ReconError>` for each CSV row:
//!
//! ```no_run
//! use fuel_reconciliation_engine::io::csv_format::ReadingRow;
//! use fuel_reconciliation_engine::io::sync_reader::SyncReader;
//! use std::path::Path;
//!
//! let reader = SyncReader::<ReadingRow>::new(Path::new("readings.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(reading) => println!("{} at {}", reading.nozzle_id, reading.recorded_at),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - A missing or unreadable file is returned from `new()`
//! - Row errors are yielded as `ParseError` with the line number
//!
//! Memory use is constant per row; the file is never loaded whole.

use crate::io::csv_format::CsvRow;
use crate::types::ReconError;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

#[derive(Debug)]
pub struct SyncReader<T> {
    reader: csv::Reader<File>,
    line_num: u64,
    rows: PhantomData<T>,
}

impl<T: CsvRow> SyncReader<T> {
    /// Open a CSV file for streaming iteration
    ///
    /// Fields are trimmed, rows may omit trailing optional columns, and
    /// reads go through an 8KB buffer.
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the path does not exist, `IoError` if it cannot be
    /// opened.
    pub fn new(path: &Path) -> Result<Self, ReconError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ReconError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ReconError::IoError {
                message: format!("Failed to open file '{}': {}", path.display(), e),
            },
        })?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 1,
            rows: PhantomData,
        })
    }
}

impl<T: CsvRow> Iterator for SyncReader<T> {
    type Item = Result<T::Record, ReconError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<T>();
        let row = deserializer.next()?;
        self.line_num += 1;

        Some(match row {
            Ok(row) => row.convert().map_err(|message| ReconError::ParseError {
                line: Some(self.line_num),
                message,
            }),
            Err(e) => Err(ReconError::from(e)),
        })
    }
}
