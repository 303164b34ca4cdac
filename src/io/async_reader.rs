//! Asynchronous CSV reader with batch interface
//!
//! Streams the records of one CSV file in batches, for the async strategy.
//!
//! # Design
//!
//! The AsyncReader uses:
//! - csv-async for streaming CSV parsing
//! - the same `CsvRow` conversions as the sync reader
//! - batch reading so ingestion can fan out per batch
//!
//! ```text
//! CSV Reader → AsyncReader<R, T> → Batches of T::Record
//!                  ↓
//!           csv_format module
//!           (CsvRow::convert)
//! ```
//!
//! Rows that fail to parse or convert are logged with `tracing::warn!` and
//! skipped; they never end a batch early.

use crate::io::csv_format::CsvRow;
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use std::marker::PhantomData;

pub struct AsyncReader<R: AsyncRead + Unpin, T> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    rows: PhantomData<T>,
}

impl<R, T> AsyncReader<R, T>
where
    R: AsyncRead + Unpin + Send + 'static,
    T: CsvRow + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            rows: PhantomData,
        }
    }

    /// Read up to `batch_size` records
    ///
    /// Returns an empty vector once the end of the file is reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<T::Record> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut rows = self.csv_reader.deserialize::<T>();

        while batch.len() < batch_size {
            match rows.next().await {
                Some(Ok(row)) => match row.convert() {
                    Ok(record) => batch.push(record),
                    Err(e) => tracing::warn!(error = %e, "skipping unconvertible row"),
                },
                Some(Err(e)) => tracing::warn!(error = %e, "skipping malformed row"),
                None => break,
            }
        }

        batch
    }

    /// Drain the remaining records
    pub async fn read_all(&mut self, batch_size: usize) -> Vec<T::Record> {
        let mut records = Vec::new();
        loop {
            let batch = self.read_batch(batch_size.max(1)).await;
            if batch.is_empty() {
                return records;
            }
            records.extend(batch);
        }
    }
}
