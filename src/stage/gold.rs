// src/stage/gold.rs

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::{
    coerce::coerce_columns,
    config::LakeConfig,
    lake::Lake,
    table::{read_parquet, write_parquet},
    warehouse::{LoadJob, TableRef, Warehouse},
};

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTable {
    pub table: TableRef,
    pub files: usize,
    /// `(silver key, column)` pairs that could not be converted and were
    /// loaded with their original type.
    pub coercion_failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldSummary {
    pub tables: Vec<LoadedTable>,
}

/// Group Parquet keys under `silver_prefix` by their first folder.
///
/// Returns folder → keys relative to that folder. Files sitting directly
/// under the prefix belong to no table and are ignored.
pub fn silver_folders(keys: &[String], silver_prefix: &str) -> BTreeMap<String, Vec<String>> {
    let base = silver_prefix.trim_matches('/');
    let mut folders: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in keys {
        if !key.ends_with(".parquet") {
            continue;
        }
        let Some(rel) = key
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            continue;
        };
        if let Some((folder, file)) = rel.split_once('/') {
            if !folder.is_empty() && !file.is_empty() {
                folders
                    .entry(folder.to_string())
                    .or_default()
                    .push(file.to_string());
            }
        }
    }
    folders
}

/// Fix column types in every silver file, stage the result under
/// `staging_prefix`, and load each silver folder into its own table.
#[instrument(level = "info", skip_all, fields(silver_prefix = %cfg.silver_prefix, dataset = %cfg.destination))]
pub async fn run(lake: &Lake, warehouse: &dyn Warehouse, cfg: &LakeConfig) -> Result<GoldSummary> {
    let base = cfg.silver_prefix.trim_matches('/');
    let staging = cfg.staging_prefix.trim_matches('/');
    let keys = lake.list(base).await?;
    let folders = silver_folders(&keys, base);
    if folders.is_empty() {
        warn!("no silver folders found");
    }

    let mut summary = GoldSummary::default();
    for (folder, files) in folders {
        info!(folder = %folder, files = files.len(), "loading folder");
        let mut uris = Vec::with_capacity(files.len());
        let mut coercion_failures = Vec::new();

        for file in &files {
            let key = format!("{}/{}/{}", base, folder, file);
            info!(file = %key, "fixing column types");
            let data = lake.download(&key).await?;
            let batch = read_parquet(data).with_context(|| format!("decoding {}", key))?;
            let (fixed, report) = coerce_columns(&batch, &cfg.coerce)
                .with_context(|| format!("converting {}", key))?;
            coercion_failures.extend(
                report
                    .failures()
                    .map(|(column, _)| (key.clone(), column.to_string())),
            );

            let staged = format!("{}/{}/{}", staging, folder, file);
            let bytes = write_parquet(&fixed).with_context(|| format!("encoding {}", staged))?;
            lake.upload(bytes, &staged).await?;
            uris.push(lake.uri(&staged));
        }

        let job = LoadJob {
            source_uris: uris,
            table: TableRef {
                dataset: cfg.destination.clone(),
                table: folder.clone(),
            },
            disposition: cfg.write_disposition,
        };
        info!(table = %job.table, files = job.source_uris.len(), "starting load");
        warehouse
            .load_parquet(&job)
            .await
            .with_context(|| format!("loading table {}", job.table))?;
        info!(table = %job.table, "table loaded");

        summary.tables.push(LoadedTable {
            table: job.table,
            files: files.len(),
            coercion_failures,
        });
    }

    Ok(summary)
}
