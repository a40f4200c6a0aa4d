// src/table/parquet.rs

use anyhow::{Context, Result};
use arrow::{compute::concat_batches, record_batch::RecordBatch};
use bytes::Bytes;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};

const READ_BATCH_SIZE: usize = 8192;

/// Decode a whole Parquet object into a single in-memory batch.
///
/// Every row group is read and concatenated; a file without rows yields an
/// empty batch carrying the file schema.
pub fn read_parquet(data: Bytes) -> Result<RecordBatch> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(data).context("opening parquet reader")?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(READ_BATCH_SIZE)
        .build()
        .context("building parquet reader")?;

    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .context("decoding parquet batches")?;

    concat_batches(&schema, &batches).context("concatenating parquet batches")
}

/// Encode `batch` as a Snappy-compressed Parquet file held in memory.
pub fn write_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .context("creating parquet writer")?;
    writer.write(batch).context("writing batch to parquet")?;
    writer.close().context("closing parquet writer")?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Float64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use std::sync::Arc;

    fn sample() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("NU_INSCRICAO", DataType::Utf8, true),
            Field::new("NU_NOTA_MT", DataType::Float64, true),
        ]));
        let ids: ArrayRef = Arc::new(StringArray::from(vec![
            Some("210001"),
            Some("210002"),
            Some("210003"),
            None,
            Some("210005"),
        ]));
        let notes: ArrayRef = Arc::new(Float64Array::from(vec![
            Some(512.3),
            None,
            Some(701.0),
            Some(433.9),
            None,
        ]));
        RecordBatch::try_new(schema, vec![ids, notes]).unwrap()
    }

    #[test]
    fn reads_back_what_it_wrote() -> Result<()> {
        let batch = sample();
        let bytes = write_parquet(&batch)?;
        let back = read_parquet(Bytes::from(bytes))?;

        assert_eq!(back.schema(), batch.schema());
        assert_eq!(back, batch);
        Ok(())
    }

    #[test]
    fn concatenates_row_groups() -> Result<()> {
        let batch = sample();
        let props = WriterProperties::builder()
            .set_max_row_group_size(2)
            .build();
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        let back = read_parquet(Bytes::from(buffer))?;
        assert_eq!(back.num_rows(), 5);
        assert_eq!(back, batch);
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        let err = read_parquet(Bytes::from_static(b"not a parquet file")).unwrap_err();
        assert!(err.to_string().contains("opening parquet reader"));
    }
}
