// src/table/mod.rs

pub mod csv;
pub mod parquet;

pub use self::csv::{csv_chunks, CsvChunks, CsvOptions, TextInput};
pub use self::parquet::{read_parquet, write_parquet};
