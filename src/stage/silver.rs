// src/stage/silver.rs

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use tracing::{info, instrument, warn};

use crate::{
    config::LakeConfig,
    lake::{file_stem, Lake},
    partition::partition,
    table::{read_parquet, write_parquet},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SilverSummary {
    /// Bronze keys that were partitioned, in processing order.
    pub sources: Vec<String>,
    /// Every silver key written.
    pub outputs: Vec<String>,
}

/// Where a group's slice of one source lands:
/// `<silver_prefix>/<group>/<stem>_<group>.parquet`.
pub fn silver_key(silver_prefix: &str, group: &str, stem: &str) -> String {
    format!(
        "{}/{}/{}_{}.parquet",
        silver_prefix.trim_end_matches('/'),
        group,
        stem,
        group
    )
}

/// Keys selected by `source_prefix`.
///
/// A prefix ending in `.parquet` names a single object. Anything else matches
/// `<source_prefix>*.parquet` within the prefix's own directory, without
/// descending into subdirectories.
pub async fn discover_sources(lake: &Lake, source_prefix: &str) -> Result<Vec<String>> {
    let source_prefix = source_prefix.trim_start_matches('/');
    let pattern = if source_prefix.ends_with(".parquet") {
        Pattern::escape(source_prefix)
    } else {
        format!("{}*.parquet", Pattern::escape(source_prefix))
    };
    let pattern =
        Pattern::new(&pattern).with_context(|| format!("building pattern for {}", source_prefix))?;
    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    };

    let dir = source_prefix
        .rfind('/')
        .map(|idx| &source_prefix[..idx])
        .unwrap_or("");
    let keys = lake.list(dir).await?;
    Ok(keys
        .into_iter()
        .filter(|key| pattern.matches_with(key, options))
        .collect())
}

/// Partition every bronze unit under `source_prefix` into the configured groups.
#[instrument(level = "info", skip_all, fields(source_prefix = %cfg.source_prefix))]
pub async fn run(lake: &Lake, cfg: &LakeConfig) -> Result<SilverSummary> {
    let sources = discover_sources(lake, &cfg.source_prefix).await?;
    if sources.is_empty() {
        warn!("no source files matched");
    }
    info!(count = sources.len(), "partitioning sources");

    let mut summary = SilverSummary::default();
    for key in sources {
        info!(source = %key, "processing");
        let data = lake.download(&key).await?;
        let batch = read_parquet(data).with_context(|| format!("decoding {}", key))?;
        let parts = partition(&batch, &cfg.drop_columns, &cfg.groups)
            .with_context(|| format!("partitioning {}", key))?;

        let stem = file_stem(&key);
        for part in parts {
            let out_key = silver_key(&cfg.silver_prefix, &part.group, stem);
            let bytes =
                write_parquet(&part.data).with_context(|| format!("encoding {}", out_key))?;
            lake.upload(bytes, &out_key).await?;
            info!(
                output = %out_key,
                rows = part.data.num_rows(),
                columns = part.data.num_columns(),
                "saved group"
            );
            summary.outputs.push(out_key);
        }
        summary.sources.push(key);
    }

    info!(
        sources = summary.sources.len(),
        outputs = summary.outputs.len(),
        "silver stage finished"
    );
    Ok(summary)
}
