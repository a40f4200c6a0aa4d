//! Bronze/silver/gold ETL for ENEM exam microdata.
//!
//! The pure transforms live in [`partition`] and [`coerce`]; everything that
//! touches storage or the warehouse takes its collaborator as a parameter.

pub mod coerce;
pub mod config;
pub mod lake;
pub mod partition;
pub mod stage;
pub mod table;
pub mod warehouse;

pub use coerce::{coerce_columns, CoercionError, CoercionReport, ColumnOutcome, NumericKind};
pub use config::{BronzeConfig, LakeConfig};
pub use lake::Lake;
pub use partition::{drop_columns, partition, project_group, GroupSpec, Partition};
pub use warehouse::{DryRun, LoadJob, TableRef, Warehouse, WriteDisposition};
