// src/config.rs

use anyhow::{bail, ensure, Context, Result};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{coerce::NumericKind, partition::GroupSpec, table::CsvOptions, WriteDisposition};

/// Everything a run needs to know about the lake, loaded from YAML.
///
/// ```yaml
/// bucket: enemm-bucket
/// credentials: chave/service-account.json
/// source_prefix: bronze/parquet/MICRODADOS_ENEM_2023_chunk_
/// destination: dados_enem_2023
/// project: my-gcp-project
/// drop_columns: [NU_ANO, TX_GABARITO_CN]
/// groups:
///   prova: [NU_INSCRICAO, NU_NOTA_CN, TP_PRESENCA_CN]
///   escola: [NU_INSCRICAO, CO_MUNICIPIO_ESC]
/// coerce:
///   TP_PRESENCA_CN: integer
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LakeConfig {
    /// Bucket name, `gs://bucket`, `file:///dir` or `memory://`.
    pub bucket: String,
    /// Service-account key for Google Cloud Storage; falls back to the
    /// environment when absent.
    #[serde(default)]
    pub credentials: Option<PathBuf>,
    /// Key prefix of the bronze Parquet units the silver stage reads. May end
    /// in the middle of a file name; a full `.parquet` key selects one file.
    pub source_prefix: String,
    /// Warehouse dataset that receives one table per silver folder.
    pub destination: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub drop_columns: IndexSet<String>,
    pub groups: GroupSpec,
    #[serde(default = "default_silver_prefix")]
    pub silver_prefix: String,
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
    #[serde(default)]
    pub coerce: IndexMap<String, NumericKind>,
    #[serde(default)]
    pub write_disposition: WriteDisposition,
    #[serde(default)]
    pub bronze: Option<BronzeConfig>,
}

/// Raw export upload and CSV → Parquet chunking.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BronzeConfig {
    /// Key the untouched CSV is uploaded to.
    pub raw_key: String,
    #[serde(default = "default_parquet_prefix")]
    pub parquet_prefix: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
    #[serde(default = "default_latin1")]
    pub latin1: bool,
}

fn default_silver_prefix() -> String {
    "silver/parquet".to_string()
}

fn default_staging_prefix() -> String {
    "temp".to_string()
}

fn default_parquet_prefix() -> String {
    "bronze/parquet".to_string()
}

fn default_delimiter() -> char {
    ';'
}

fn default_chunk_rows() -> usize {
    100_000
}

fn default_latin1() -> bool {
    true
}

impl LakeConfig {
    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: LakeConfig = serde_yaml::from_str(text).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.bucket.trim().is_empty(), "bucket must not be empty");
        ensure!(
            !self.source_prefix.trim().is_empty(),
            "source_prefix must not be empty"
        );
        ensure!(
            !self.destination.trim().is_empty(),
            "destination must not be empty"
        );
        ensure!(!self.groups.is_empty(), "at least one group is required");
        ensure!(
            !self.silver_prefix.trim_matches('/').is_empty(),
            "silver_prefix must not be empty"
        );
        ensure!(
            !self.staging_prefix.trim_matches('/').is_empty(),
            "staging_prefix must not be empty"
        );

        for (name, columns) in &self.groups {
            if name.trim().is_empty() {
                bail!("group names must not be empty");
            }
            // the name is both a key segment and a warehouse table id
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                bail!(
                    "group name `{}` may only contain ASCII letters, digits and '_'",
                    name
                );
            }
            if columns.is_empty() {
                bail!("group `{}` lists no columns", name);
            }
        }

        if let Some(bronze) = &self.bronze {
            ensure!(!bronze.raw_key.trim().is_empty(), "bronze.raw_key must not be empty");
            ensure!(bronze.chunk_rows > 0, "bronze.chunk_rows must be positive");
            ensure!(
                bronze.delimiter.is_ascii(),
                "bronze.delimiter must be a single ASCII character"
            );
        }
        Ok(())
    }
}

impl BronzeConfig {
    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            delimiter: self.delimiter as u8,
            chunk_rows: self.chunk_rows,
            latin1: self.latin1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
bucket: enemm-bucket
credentials: chave/key.json
source_prefix: bronze/parquet/MICRODADOS_ENEM_2023_chunk_
destination: dados_enem_2023
project: analytics-project
drop_columns: [Q023, NU_ANO, Q023]
groups:
  participante: [NU_INSCRICAO, TP_FAIXA_ETARIA, TP_SEXO]
  escola: [NU_INSCRICAO, CO_MUNICIPIO_ESC]
  prova: [NU_INSCRICAO, NU_NOTA_CN, TP_PRESENCA_CN]
coerce:
  TP_PRESENCA_CN: integer
  Q005: Int64
  NU_NOTA_CN: float
write_disposition: append
bronze:
  raw_key: bronze/microdados_enem.csv
  chunk_rows: 50000
"#;

    const MINIMAL: &str = r#"
bucket: enemm2015_bucket
source_prefix: bronze/parquet/
destination: dados_enem_2015
groups:
  prova: [NU_INSCRICAO]
"#;

    #[test]
    fn parses_full_config() -> Result<()> {
        let cfg = LakeConfig::from_yaml(FULL)?;

        assert_eq!(cfg.bucket, "enemm-bucket");
        assert_eq!(cfg.credentials, Some(PathBuf::from("chave/key.json")));
        assert_eq!(cfg.project.as_deref(), Some("analytics-project"));
        assert_eq!(cfg.drop_columns.len(), 2);
        assert_eq!(
            cfg.groups.keys().collect::<Vec<_>>(),
            vec!["participante", "escola", "prova"]
        );
        assert_eq!(cfg.coerce["Q005"], NumericKind::Integer);
        assert_eq!(cfg.coerce["NU_NOTA_CN"], NumericKind::Float);
        assert_eq!(cfg.write_disposition, WriteDisposition::Append);

        let bronze = cfg.bronze.as_ref().unwrap();
        assert_eq!(bronze.parquet_prefix, "bronze/parquet");
        let options = bronze.csv_options();
        assert_eq!(options.delimiter, b';');
        assert_eq!(options.chunk_rows, 50_000);
        assert!(options.latin1);
        Ok(())
    }

    #[test]
    fn applies_defaults() -> Result<()> {
        let cfg = LakeConfig::from_yaml(MINIMAL)?;

        assert_eq!(cfg.silver_prefix, "silver/parquet");
        assert_eq!(cfg.staging_prefix, "temp");
        assert_eq!(cfg.write_disposition, WriteDisposition::Truncate);
        assert!(cfg.drop_columns.is_empty());
        assert!(cfg.coerce.is_empty());
        assert!(cfg.bronze.is_none());
        assert!(cfg.credentials.is_none());
        Ok(())
    }

    #[test]
    fn rejects_invalid_configs() {
        let cases = [
            MINIMAL.replace("bucket: enemm2015_bucket", "bucket: ''"),
            MINIMAL.replace("prova: [NU_INSCRICAO]", "prova: []"),
            MINIMAL.replace("prova: [NU_INSCRICAO]", "\"a/b\": [NU_INSCRICAO]"),
            MINIMAL.replace("prova: [NU_INSCRICAO]", "perguntas sociais: [NU_INSCRICAO]"),
            MINIMAL.replace("prova: [NU_INSCRICAO]", "prova-2015: [NU_INSCRICAO]"),
            MINIMAL.replace("prova: [NU_INSCRICAO]", "questionário: [NU_INSCRICAO]"),
            MINIMAL.replace("groups:\n  prova: [NU_INSCRICAO]", "groups: {}"),
            format!("{MINIMAL}bronze:\n  raw_key: raw.csv\n  chunk_rows: 0\n"),
            format!("{MINIMAL}coerce:\n  Q005: text\n"),
            format!("{MINIMAL}unexpected: true\n"),
        ];
        for case in cases {
            assert!(LakeConfig::from_yaml(&case).is_err(), "accepted:\n{case}");
        }
    }

    #[test]
    fn table_like_group_names_are_accepted() -> Result<()> {
        let text = MINIMAL.replace(
            "prova: [NU_INSCRICAO]",
            "perguntas_sociais_2023: [NU_INSCRICAO]",
        );
        let cfg = LakeConfig::from_yaml(&text)?;
        assert!(cfg.groups.contains_key("perguntas_sociais_2023"));
        Ok(())
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let text = MINIMAL.replace("destination: dados_enem_2015\n", "");
        let err = LakeConfig::from_yaml(&text).unwrap_err();
        assert!(format!("{err:#}").contains("destination"));
    }

    #[test]
    fn loads_from_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(MINIMAL.as_bytes())?;

        let cfg = LakeConfig::load(file.path())?;
        assert_eq!(cfg.destination, "dados_enem_2015");

        let missing = LakeConfig::load(file.path().with_extension("nope"));
        assert!(missing.is_err());
        Ok(())
    }
}
