// src/partition.rs

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

/// Group name → desired columns, in the order they should appear.
///
/// Groups may share columns; iteration order is the declaration order.
pub type GroupSpec = IndexMap<String, Vec<String>>;

/// One derived dataset produced by [`partition`].
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub group: String,
    pub data: RecordBatch,
}

/// Remove every column named in `drop`. Names absent from `batch` are ignored.
pub fn drop_columns(batch: &RecordBatch, drop: &IndexSet<String>) -> Result<RecordBatch> {
    let schema = batch.schema();
    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| !drop.contains(field.name()))
        .map(|(idx, _)| idx)
        .collect();

    if keep.len() == batch.num_columns() {
        return Ok(batch.clone());
    }

    debug!(
        dropped = batch.num_columns() - keep.len(),
        remaining = keep.len(),
        "dropping columns"
    );
    batch.project(&keep).context("projecting kept columns")
}

/// Project `batch` onto the columns of one group that actually exist.
///
/// Columns come out in the order `columns` lists them; a name repeated in the
/// group is taken once. Returns `None` when no listed column is present.
pub fn project_group(batch: &RecordBatch, columns: &[String]) -> Result<Option<RecordBatch>> {
    let schema = batch.schema();
    let mut indices = Vec::with_capacity(columns.len());
    for name in columns {
        if let Ok(idx) = schema.index_of(name) {
            if !indices.contains(&idx) {
                indices.push(idx);
            }
        }
    }

    if indices.is_empty() {
        return Ok(None);
    }
    batch
        .project(&indices)
        .map(Some)
        .context("projecting group columns")
}

/// Drop `drop` from `batch`, then emit one projection per non-empty group in
/// `groups` order.
pub fn partition(
    batch: &RecordBatch,
    drop: &IndexSet<String>,
    groups: &GroupSpec,
) -> Result<Vec<Partition>> {
    let reduced = drop_columns(batch, drop)?;

    let mut out = Vec::with_capacity(groups.len());
    for (group, columns) in groups {
        match project_group(&reduced, columns)? {
            Some(data) => {
                debug!(group = %group, columns = data.num_columns(), "group projected");
                out.push(Partition {
                    group: group.clone(),
                    data,
                });
            }
            None => debug!(group = %group, "no listed column present, skipping group"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use std::sync::Arc;

    fn names(batch: &RecordBatch) -> Vec<String> {
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn abc() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("A", DataType::Int64, true),
            Field::new("B", DataType::Utf8, true),
            Field::new("C", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), None, Some(3)])) as ArrayRef,
                Arc::new(StringArray::from(vec!["b1", "b2", "b3"])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("c1"), Some("c2"), None])) as ArrayRef,
            ],
        )
        .unwrap()
    }

    #[test]
    fn drop_then_project_keeps_present_columns_in_group_order() -> Result<()> {
        let batch = abc();
        let drop = IndexSet::from(["B".to_string()]);
        let groups = GroupSpec::from([("g1".to_string(), strings(&["A", "C", "Z"]))]);

        let reduced = drop_columns(&batch, &drop)?;
        assert_eq!(names(&reduced), vec!["A", "C"]);
        assert_eq!(reduced.num_rows(), 3);

        let parts = partition(&batch, &drop, &groups)?;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].group, "g1");
        assert_eq!(names(&parts[0].data), vec!["A", "C"]);
        assert_eq!(parts[0].data.column(0), batch.column(0));
        assert_eq!(parts[0].data.column(1), batch.column(2));
        Ok(())
    }

    #[test]
    fn dropping_absent_columns_is_a_no_op() -> Result<()> {
        let batch = abc();
        let drop = IndexSet::from(["NU_ANO".to_string(), "TX_GABARITO_CN".to_string()]);
        assert_eq!(drop_columns(&batch, &drop)?, batch);
        Ok(())
    }

    #[test]
    fn dropping_everything_keeps_row_count() -> Result<()> {
        let batch = abc();
        let drop = IndexSet::from(["A".to_string(), "B".to_string(), "C".to_string()]);
        let reduced = drop_columns(&batch, &drop)?;
        assert_eq!(reduced.num_columns(), 0);
        assert_eq!(reduced.num_rows(), 3);
        Ok(())
    }

    #[test]
    fn group_with_no_present_columns_emits_nothing() -> Result<()> {
        let groups = GroupSpec::from([
            ("escola".to_string(), strings(&["CO_MUNICIPIO_ESC", "TP_LOCALIZACAO_ESC"])),
            ("g1".to_string(), strings(&["C"])),
        ]);
        let parts = partition(&abc(), &IndexSet::new(), &groups)?;

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].group, "g1");
        Ok(())
    }

    #[test]
    fn dropped_column_is_not_resurrected_by_a_group() -> Result<()> {
        let drop = IndexSet::from(["B".to_string()]);
        let groups = GroupSpec::from([("only_b".to_string(), strings(&["B"]))]);
        assert!(partition(&abc(), &drop, &groups)?.is_empty());
        Ok(())
    }

    #[test]
    fn emits_groups_in_declaration_order() -> Result<()> {
        let groups = GroupSpec::from([
            ("z_last".to_string(), strings(&["C"])),
            ("a_first".to_string(), strings(&["A"])),
            ("m_mid".to_string(), strings(&["B", "A"])),
        ]);
        let parts = partition(&abc(), &IndexSet::new(), &groups)?;

        let order: Vec<&str> = parts.iter().map(|p| p.group.as_str()).collect();
        assert_eq!(order, vec!["z_last", "a_first", "m_mid"]);
        assert_eq!(names(&parts[2].data), vec!["B", "A"]);
        Ok(())
    }

    #[test]
    fn shared_columns_are_independent_per_group() -> Result<()> {
        let groups = GroupSpec::from([
            ("prova".to_string(), strings(&["A", "B"])),
            ("escola".to_string(), strings(&["A", "C"])),
        ]);
        let parts = partition(&abc(), &IndexSet::new(), &groups)?;
        assert_eq!(parts.len(), 2);

        // swap out the shared column in the first output only
        let first = &parts[0].data;
        let replaced = RecordBatch::try_new(
            first.schema(),
            vec![
                Arc::new(Int64Array::from(vec![Some(9), Some(9), Some(9)])) as ArrayRef,
                first.column(1).clone(),
            ],
        )?;

        assert_ne!(replaced.column(0), parts[1].data.column(0));
        assert_eq!(
            parts[1].data.column(0).as_ref(),
            &Int64Array::from(vec![Some(1), None, Some(3)]) as &dyn arrow::array::Array
        );
        Ok(())
    }

    #[test]
    fn projection_is_idempotent() -> Result<()> {
        let columns = strings(&["C", "A", "Z"]);
        let once = project_group(&abc(), &columns)?.unwrap();
        let twice = project_group(&once, &columns)?.unwrap();
        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn repeated_name_in_group_is_taken_once() -> Result<()> {
        let projected = project_group(&abc(), &strings(&["A", "C", "A"]))?.unwrap();
        assert_eq!(names(&projected), vec!["A", "C"]);
        Ok(())
    }

    #[test]
    fn zero_row_input_still_projects() -> Result<()> {
        let empty = abc().slice(0, 0);
        let projected = project_group(&empty, &strings(&["B"]))?.unwrap();
        assert_eq!(projected.num_rows(), 0);
        assert_eq!(names(&projected), vec!["B"]);
        Ok(())
    }
}
