// JSON export

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use fpgrid_engine::session::SubjectGrid;
use fpgrid_engine::CellUpdate;

use crate::error::PlanIoError;

/// JSON shape of one subject grid.
///
/// Values are minor units keyed by period label, bottom-up. A leaf that was
/// never entered exports as 0.
#[derive(Debug, Serialize)]
pub struct GridJson {
    pub subject: String,
    pub name: String,
    pub rows: Vec<GridRowJson>,
}

#[derive(Debug, Serialize)]
pub struct GridRowJson {
    /// `null` for the totals row.
    pub dimension: Option<String>,
    pub label: String,
    pub level: u32,
    pub editable: bool,
    pub values: Map<String, Value>,
}

impl From<&SubjectGrid> for GridJson {
    fn from(grid: &SubjectGrid) -> Self {
        let rows = grid
            .rows
            .iter()
            .map(|row| {
                let mut values = Map::new();
                for (period, value) in grid.periods.iter().zip(&row.values) {
                    let minor = value.map_or(0, |v| v.minor_units());
                    values.insert(period.label.clone(), Value::from(minor));
                }
                GridRowJson {
                    dimension: row.dimension.as_ref().map(|d| d.to_string()),
                    label: row.label.clone(),
                    level: row.level,
                    editable: row.editable,
                    values,
                }
            })
            .collect();
        Self { subject: grid.subject.to_string(), name: grid.name.clone(), rows }
    }
}

pub fn grid_to_value(grid: &SubjectGrid) -> Value {
    serde_json::to_value(GridJson::from(grid)).unwrap_or(Value::Null)
}

/// Export grids as a pretty-printed JSON array.
pub fn export(grids: &[SubjectGrid], path: &Path) -> Result<(), PlanIoError> {
    let file = File::create(path).map_err(|e| PlanIoError::io(path, e))?;
    let writer = BufWriter::new(file);
    let payload: Vec<GridJson> = grids.iter().map(GridJson::from).collect();
    serde_json::to_writer_pretty(writer, &payload).map_err(|e| PlanIoError::io(path, e.into()))?;
    Ok(())
}

/// Patch of changed cells: `[{cell, value}]`, value in minor units.
pub fn patch_to_value(updates: &[CellUpdate]) -> Value {
    updates
        .iter()
        .map(|u| {
            let mut entry = Map::new();
            entry.insert("cell".into(), Value::from(u.key().to_string()));
            entry.insert("value".into(), Value::from(u.value.minor_units()));
            Value::Object(entry)
        })
        .collect()
}
