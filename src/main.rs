use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use enem_lake::{
    stage::{bronze, gold, silver},
    warehouse::BigQuery,
    DryRun, Lake, LakeConfig, Warehouse,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "ENEM microdata lake: bronze → silver → gold")]
struct Args {
    /// YAML config describing the bucket, groups and warehouse target
    #[arg(short, long, default_value = "enem-lake.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    stage: Stage,
}

#[derive(Subcommand, Debug)]
enum Stage {
    /// Upload a raw CSV export and split it into Parquet chunks
    Bronze {
        #[arg(long)]
        csv: PathBuf,
        /// Only upload the raw file
        #[arg(long)]
        raw_only: bool,
    },
    /// Partition bronze Parquet units into column groups
    Silver,
    /// Fix column types and load every silver folder into the warehouse
    Gold {
        /// OAuth access token for BigQuery; defaults to the bucket's credentials
        #[arg(long, env = "BIGQUERY_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
        /// Stage corrected files but log the load jobs instead of running them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();

    // ─── 2) config + storage ─────────────────────────────────────────
    let args = Args::parse();
    let cfg = LakeConfig::load(&args.config)?;
    info!(config = %args.config.display(), bucket = %cfg.bucket, "startup");
    let lake = Lake::open(&cfg.bucket, cfg.credentials.as_deref())?;

    // ─── 3) run the requested stage ──────────────────────────────────
    match args.stage {
        Stage::Bronze { csv, raw_only } => {
            let summary = bronze::run(&lake, &cfg, &csv, !raw_only).await?;
            info!(
                raw = %summary.raw_uri,
                chunks = summary.chunks.len(),
                rows = summary.rows,
                "bronze done"
            );
        }
        Stage::Silver => {
            let summary = silver::run(&lake, &cfg).await?;
            info!(
                sources = summary.sources.len(),
                outputs = summary.outputs.len(),
                "silver done"
            );
        }
        Stage::Gold {
            access_token,
            dry_run,
        } => {
            let warehouse: Box<dyn Warehouse> = if dry_run {
                Box::new(DryRun)
            } else {
                let project = cfg
                    .project
                    .clone()
                    .ok_or_else(|| anyhow!("`project` must be set to load into BigQuery"))?;
                match (access_token, lake.gcp_credentials()) {
                    (Some(token), _) => Box::new(BigQuery::new(project, token)),
                    (None, Some(credentials)) => {
                        Box::new(BigQuery::with_credentials(project, credentials))
                    }
                    (None, None) => bail!(
                        "BigQuery needs --access-token unless the lake is a Google Cloud Storage bucket"
                    ),
                }
            };

            let summary = gold::run(&lake, warehouse.as_ref(), &cfg).await?;
            for table in &summary.tables {
                for (file, column) in &table.coercion_failures {
                    warn!(table = %table.table, file = %file, column = %column, "column loaded unconverted");
                }
                info!(table = %table.table, files = table.files, "loaded");
            }
        }
    }

    info!("all done");
    Ok(())
}
