// src/stage/bronze.rs

use anyhow::{anyhow, Context, Result};
use std::{fs::File, io::BufReader, path::Path};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::{
    config::{BronzeConfig, LakeConfig},
    lake::{file_stem, Lake},
    table::{csv_chunks, write_parquet},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BronzeSummary {
    /// URI of the untouched export.
    pub raw_uri: String,
    /// Keys of the Parquet chunks, in row order.
    pub chunks: Vec<String>,
    pub rows: usize,
}

/// Upload a local file unchanged to `key`. Returns the object's URI.
#[instrument(level = "info", skip(lake, local), fields(file = %local.display()))]
pub async fn upload_raw(lake: &Lake, local: &Path, key: &str) -> Result<String> {
    let len = lake.upload_file(local, key).await?;
    let uri = lake.uri(key);
    info!(bytes = len, uri = %uri, "uploaded raw export");
    Ok(uri)
}

/// Split a local CSV export into Parquet chunks under `parquet_prefix`, named
/// `<stem>_chunk_<n>.parquet` with `n` counting from zero.
///
/// Chunks are decoded and encoded on a blocking thread and handed over one at
/// a time; at most one chunk is uploading, one queued and one being decoded.
#[instrument(level = "info", skip(lake, local, cfg), fields(file = %local.display()))]
pub async fn chunk_to_parquet(
    lake: &Lake,
    local: &Path,
    stem: &str,
    cfg: &BronzeConfig,
) -> Result<(Vec<String>, usize)> {
    let (tx, mut rx) = mpsc::channel::<(Vec<u8>, usize)>(1);
    let path = local.to_path_buf();
    let options = cfg.csv_options();

    let decoder = tokio::task::spawn_blocking(move || -> Result<()> {
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        for batch in csv_chunks(BufReader::new(file), &options)? {
            let batch = batch.context("decoding CSV records")?;
            let bytes = write_parquet(&batch)?;
            if tx.blocking_send((bytes, batch.num_rows())).is_err() {
                // uploader gave up
                break;
            }
        }
        Ok(())
    });

    let prefix = cfg.parquet_prefix.trim_end_matches('/');
    let mut keys = Vec::new();
    let mut rows = 0;
    while let Some((bytes, chunk_rows)) = rx.recv().await {
        let key = format!("{}/{}_chunk_{}.parquet", prefix, stem, keys.len());
        debug!(key = %key, bytes = bytes.len(), "encoded bronze chunk");
        lake.upload(bytes, &key).await?;
        info!(key = %key, rows = chunk_rows, "wrote bronze chunk");
        rows += chunk_rows;
        keys.push(key);
    }

    decoder
        .await
        .context("CSV decode task panicked")?
        .with_context(|| format!("decoding {}", local.display()))?;
    Ok((keys, rows))
}

/// Upload `local_csv` to `bronze.raw_key` and, when `with_chunks` is set, its
/// Parquet chunks under `bronze.parquet_prefix`.
#[instrument(level = "info", skip_all, fields(file = %local_csv.display()))]
pub async fn run(
    lake: &Lake,
    cfg: &LakeConfig,
    local_csv: &Path,
    with_chunks: bool,
) -> Result<BronzeSummary> {
    let bronze = cfg
        .bronze
        .as_ref()
        .ok_or_else(|| anyhow!("config has no `bronze` section"))?;

    let raw_uri = upload_raw(lake, local_csv, &bronze.raw_key).await?;
    let mut summary = BronzeSummary {
        raw_uri,
        ..BronzeSummary::default()
    };
    if !with_chunks {
        return Ok(summary);
    }

    let stem = file_stem(&bronze.raw_key);
    let (chunks, rows) = chunk_to_parquet(lake, local_csv, stem, bronze).await?;
    info!(chunks = chunks.len(), rows, "bronze stage finished");

    summary.chunks = chunks;
    summary.rows = rows;
    Ok(summary)
}
