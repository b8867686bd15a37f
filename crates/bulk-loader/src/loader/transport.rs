//! Columnar transport buffer for the native bulk-copy path.
//!
//! The full record set is materialized once, column by column in write-shape
//! order, then handed to the wire in fixed-size chunks. Text values borrow
//! from the records; nothing is copied per chunk.

use crate::core::mapping::RowMapper;
use crate::core::schema::Entity;
use crate::core::value::SqlValue;
use crate::error::{LoadError, Result};

/// Default number of rows per wire chunk.
pub const DEFAULT_TRANSPORT_CHUNK_SIZE: usize = 2500;

/// Record set laid out as one value vector per written column.
#[derive(Debug)]
pub struct TransportBuffer<'r> {
    columns: Vec<Vec<SqlValue<'r>>>,
    rows: usize,
    chunk_size: usize,
}

impl<'r> TransportBuffer<'r> {
    /// Materialize `records` through `mapper`.
    pub fn materialize<E: Entity>(
        mapper: &RowMapper<E>,
        records: &'r [E],
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(LoadError::Config(
                "transport_chunk_size must be greater than 0".into(),
            ));
        }

        let width = mapper.shape().columns.len();
        let mut columns: Vec<Vec<SqlValue<'r>>> =
            (0..width).map(|_| Vec::with_capacity(records.len())).collect();

        for record in records {
            for (column, value) in columns.iter_mut().zip(mapper.row(record)) {
                column.push(value);
            }
        }

        Ok(Self {
            columns,
            rows: records.len(),
            chunk_size,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of wire chunks the buffer splits into.
    pub fn chunk_count(&self) -> usize {
        self.rows.div_ceil(self.chunk_size)
    }

    /// Iterate over consecutive chunks of at most `chunk_size` rows.
    pub fn chunks(&self) -> impl Iterator<Item = TransportChunk<'_>> + '_ {
        (0..self.chunk_count()).map(move |i| {
            let start = i * self.chunk_size;
            let end = (start + self.chunk_size).min(self.rows);
            TransportChunk {
                columns: &self.columns,
                start,
                end,
            }
        })
    }
}

/// A contiguous row range of a [`TransportBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct TransportChunk<'a> {
    columns: &'a [Vec<SqlValue<'a>>],
    start: usize,
    end: usize,
}

impl<'a> TransportChunk<'a> {
    /// Number of rows in the chunk.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Offset of the first row within the whole buffer.
    pub fn offset(&self) -> usize {
        self.start
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Values of row `i` (relative to the chunk) in column order.
    pub fn row(&self, i: usize) -> impl Iterator<Item = &'a SqlValue<'a>> + 'a {
        let idx = self.start + i;
        self.columns.iter().map(move |col| &col[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Example;
    use crate::core::schema::SchemaRegistry;
    use chrono::NaiveDateTime;

    fn mapper(keep_identity: bool) -> RowMapper<Example> {
        let schema = SchemaRegistry::new()
            .map::<Example>("dbo", "Example")
            .resolve::<Example>()
            .unwrap();
        RowMapper::build(&schema, keep_identity).unwrap()
    }

    fn records(n: i32) -> Vec<Example> {
        (1..=n)
            .map(|i| Example::new(i, Some("row"), NaiveDateTime::default()))
            .collect()
    }

    #[test]
    fn test_chunks_cover_all_rows_in_order() {
        let mapper = mapper(true);
        let data = records(6000);
        let buffer = TransportBuffer::materialize(&mapper, &data, DEFAULT_TRANSPORT_CHUNK_SIZE).unwrap();

        assert_eq!(buffer.rows(), 6000);
        assert_eq!(buffer.column_count(), 3);
        assert_eq!(buffer.chunk_count(), 3);

        let sizes: Vec<usize> = buffer.chunks().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2500, 2500, 1000]);

        let ids: Vec<i64> = buffer
            .chunks()
            .flat_map(|c| (0..c.len()).map(move |i| c.row(i).next().and_then(|v| v.as_i64())))
            .map(|id| id.unwrap())
            .collect();
        assert_eq!(ids, (1..=6000).collect::<Vec<i64>>());
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        let mapper = mapper(true);
        let buffer = TransportBuffer::materialize(&mapper, &[], 2500).unwrap();
        assert_eq!(buffer.chunk_count(), 0);
        assert_eq!(buffer.chunks().count(), 0);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mapper = mapper(true);
        let err = TransportBuffer::materialize(&mapper, &records(1), 0).unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }

    #[test]
    fn test_null_is_kept_in_buffer() {
        let mapper = mapper(true);
        let data = vec![Example::new(1, None, NaiveDateTime::default())];
        let buffer = TransportBuffer::materialize(&mapper, &data, 10).unwrap();
        let chunk = buffer.chunks().next().unwrap();
        let row: Vec<_> = chunk.row(0).collect();
        assert!(row[1].is_null());
        assert_eq!(chunk.offset(), 0);
    }
}
