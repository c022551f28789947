//! Classified selection and the query text derived from it
//!
//! The host classifies picked elements (rectangular concrete columns
//! crossing the level, floors whose top is at the level, opening and load
//! guide lines) and hands this summary over. Lengths are millimetres.

use std::collections::HashSet;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::level::{layout_z_from_view_name, trim_number, LevelError};
use crate::payload::Point2D;

/// Rectangular section size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionSize {
    pub b: f64,
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: i64,
    #[serde(default)]
    pub family_type: String,
    /// Column centre at the layout level
    #[serde(default)]
    pub position_mm: Option<Point2D>,
    #[serde(default)]
    pub size_mm: Option<SectionSize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorInfo {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub view_name: String,
    /// Level in metres as displayed, e.g. `6.000`
    #[serde(default)]
    pub height_label: String,
    /// Level in host internal units (feet)
    #[serde(default)]
    pub layout_z: f64,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub floors: Vec<FloorInfo>,
    #[serde(default)]
    pub opening_lines: Vec<i64>,
    #[serde(default)]
    pub load_lines: Vec<i64>,
}

fn dedup_by_id<T>(items: &mut Vec<T>, id: impl Fn(&T) -> i64) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(id(item)));
}

impl SelectionSummary {
    /// Empty summary for a view, with the level parsed from its name
    pub fn for_view(view_name: &str) -> Result<Self, LevelError> {
        let mut summary = Self {
            view_name: view_name.to_string(),
            ..Default::default()
        };
        summary.apply_level_from_view_name()?;
        Ok(summary)
    }

    /// Fill `height_label` and `layout_z` from the view name
    pub fn apply_level_from_view_name(&mut self) -> Result<(), LevelError> {
        let level = layout_z_from_view_name(&self.view_name)?;
        self.height_label = level.label;
        self.layout_z = level.z_feet;
        Ok(())
    }

    /// Drop repeated element ids, keeping first occurrences
    pub fn dedup(&mut self) {
        dedup_by_id(&mut self.columns, |c| c.id);
        dedup_by_id(&mut self.floors, |f| f.id);
        dedup_by_id(&mut self.opening_lines, |id| *id);
        dedup_by_id(&mut self.load_lines, |id| *id);
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
            && self.floors.is_empty()
            && self.opening_lines.is_empty()
            && self.load_lines.is_empty()
    }

    pub fn counts_label(&self) -> String {
        format!(
            "columns: {}; floors: {}; opening lines: {}; load lines: {}",
            self.columns.len(),
            self.floors.len(),
            self.opening_lines.len(),
            self.load_lines.len()
        )
    }

    /// Render the model query, de-duplicating element ids first
    pub fn to_query(&self) -> String {
        let mut summary = self.clone();
        summary.dedup();

        let mut out = String::new();
        let _ = writeln!(out, "View: {}", summary.view_name);
        let _ = writeln!(
            out,
            "Level: {}m ({} ft)",
            summary.height_label,
            trim_number(summary.layout_z, 3)
        );
        let _ = writeln!(out, "{}", summary.counts_label());
        out.push('\n');

        out.push_str("Columns:\n");
        for column in &summary.columns {
            let family_type = if column.family_type.is_empty() {
                "?"
            } else {
                column.family_type.as_str()
            };
            let xy = column
                .position_mm
                .map(|p| format!("XY=({},{})mm", trim_number(p.x, 1), trim_number(p.y, 1)))
                .unwrap_or_else(|| "XY=?".to_string());
            let bh = column
                .size_mm
                .map(|s| format!("b×h={}×{}mm", trim_number(s.b, 1), trim_number(s.h, 1)))
                .unwrap_or_else(|| "b×h=?".to_string());
            let _ = writeln!(out, "- {} | {} | {} | {}", column.id, family_type, xy, bh);
        }

        out.push('\n');
        out.push_str("Floors:\n");
        for floor in &summary.floors {
            let _ = writeln!(out, "- {} | {}", floor.id, floor.name);
        }

        out
    }
}
