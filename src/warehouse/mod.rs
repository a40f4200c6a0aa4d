// src/warehouse/mod.rs

pub mod bigquery;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

pub use bigquery::BigQuery;

/// What happens to rows already in the destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    Append,
    #[default]
    Truncate,
}

/// `dataset.table` in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// A bulk load of Parquet objects into one table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadJob {
    pub source_uris: Vec<String>,
    pub table: TableRef,
    pub disposition: WriteDisposition,
}

/// Bulk-load interface. Implementations return once the job has finished and
/// fail when the job fails.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn load_parquet(&self, job: &LoadJob) -> Result<()>;
}

/// Logs each job instead of running it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRun;

#[async_trait]
impl Warehouse for DryRun {
    async fn load_parquet(&self, job: &LoadJob) -> Result<()> {
        info!(
            table = %job.table,
            files = job.source_uris.len(),
            disposition = ?job.disposition,
            "dry run: skipping load"
        );
        Ok(())
    }
}
