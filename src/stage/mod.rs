// src/stage/mod.rs

//! One function per lake tier. Each takes its collaborators as arguments and
//! processes input units strictly one after another.

pub mod bronze;
pub mod gold;
pub mod silver;

pub use bronze::BronzeSummary;
pub use gold::{GoldSummary, LoadedTable};
pub use silver::SilverSummary;
