use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub mod content;
pub mod protocol;

pub use content::WidgetContentStore;

pub const DEFAULT_GRID_COLUMNS: u32 = 12;
pub const DEFAULT_GRID_ROWS: u32 = 8;
pub const DEFAULT_GAP_PX: u32 = 16;
pub const DEFAULT_MIN_CELL_HEIGHT_PX: u32 = 80;

/// A 1-based grid cell coordinate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub grid_column: u32,
    pub grid_row: u32,
}

impl Position {
    pub fn new(grid_column: u32, grid_row: u32) -> Self {
        Self {
            grid_column,
            grid_row,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col {} row {}", self.grid_column, self.grid_row)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WidgetKind {
    Title,
    Paragraph,
    Table,
    Image,
    LineChart,
    BarChart,
    Metric,
    Map,
}

impl Default for WidgetKind {
    fn default() -> Self {
        Self::Paragraph
    }
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 8] = [
        WidgetKind::Title,
        WidgetKind::Paragraph,
        WidgetKind::Table,
        WidgetKind::Image,
        WidgetKind::LineChart,
        WidgetKind::BarChart,
        WidgetKind::Metric,
        WidgetKind::Map,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetKind::Title => "title",
            WidgetKind::Paragraph => "paragraph",
            WidgetKind::Table => "table",
            WidgetKind::Image => "image",
            WidgetKind::LineChart => "lineChart",
            WidgetKind::BarChart => "barChart",
            WidgetKind::Metric => "metric",
            WidgetKind::Map => "map",
        }
    }

    /// Default (colSpan, rowSpan) for a freshly created widget of this kind.
    pub fn default_span(&self) -> (u32, u32) {
        match self {
            WidgetKind::Title => (12, 1),
            WidgetKind::Paragraph => (4, 2),
            WidgetKind::Table => (6, 3),
            WidgetKind::Image => (4, 3),
            WidgetKind::LineChart | WidgetKind::BarChart => (6, 3),
            WidgetKind::Metric => (3, 2),
            WidgetKind::Map => (6, 4),
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WidgetKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "title" => Ok(WidgetKind::Title),
            "paragraph" | "text" => Ok(WidgetKind::Paragraph),
            "table" => Ok(WidgetKind::Table),
            "image" => Ok(WidgetKind::Image),
            "linechart" => Ok(WidgetKind::LineChart),
            "barchart" => Ok(WidgetKind::BarChart),
            "metric" => Ok(WidgetKind::Metric),
            "map" => Ok(WidgetKind::Map),
            other => Err(format!("Unknown widget type: {other}")),
        }
    }
}

/// A placed rectangular element on the dashboard grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: WidgetKind,
    pub grid_column: u32,
    pub grid_row: u32,
    pub col_span: u32,
    pub row_span: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub locked: bool,
}

impl Widget {
    pub fn new(id: impl Into<String>, kind: WidgetKind, position: Position) -> Self {
        let (col_span, row_span) = kind.default_span();
        Self {
            id: id.into(),
            kind,
            grid_column: position.grid_column,
            grid_row: position.grid_row,
            col_span,
            row_span,
            min_width: None,
            max_width: None,
            min_height: None,
            max_height: None,
            title: None,
            data: Value::Null,
            locked: false,
        }
    }

    pub fn with_span(mut self, col_span: u32, row_span: u32) -> Self {
        self.col_span = col_span;
        self.row_span = row_span;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn position(&self) -> Position {
        Position::new(self.grid_column, self.grid_row)
    }

    pub fn rect(&self) -> CellRect {
        CellRect {
            col: self.grid_column,
            row: self.grid_row,
            col_span: self.col_span,
            row_span: self.row_span,
        }
    }

    /// Last column occupied (inclusive).
    pub fn right_edge(&self) -> u32 {
        self.grid_column.saturating_add(self.col_span.saturating_sub(1))
    }

    /// Last row occupied (inclusive).
    pub fn bottom_edge(&self) -> u32 {
        self.grid_row.saturating_add(self.row_span.saturating_sub(1))
    }

    /// Clamp a requested span into this widget's own min/max constraints.
    pub fn clamp_span(&self, col_span: u32, row_span: u32) -> (u32, u32) {
        let col_span = clamp_axis(col_span, self.min_width, self.max_width);
        let row_span = clamp_axis(row_span, self.min_height, self.max_height);
        (col_span, row_span)
    }
}

fn clamp_axis(value: u32, min: Option<u32>, max: Option<u32>) -> u32 {
    let lower = min.unwrap_or(1).max(1);
    let upper = max.unwrap_or(u32::MAX).max(lower);
    value.clamp(lower, upper)
}

/// Occupied cells `[col, col + col_span) x [row, row + row_span)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRect {
    pub col: u32,
    pub row: u32,
    pub col_span: u32,
    pub row_span: u32,
}

impl CellRect {
    pub fn new(col: u32, row: u32, col_span: u32, row_span: u32) -> Self {
        Self {
            col,
            row,
            col_span,
            row_span,
        }
    }

    pub fn col_end(&self) -> u32 {
        self.col.saturating_add(self.col_span)
    }

    pub fn row_end(&self) -> u32 {
        self.row.saturating_add(self.row_span)
    }

    pub fn overlaps(&self, other: &CellRect) -> bool {
        !(self.col_end() <= other.col
            || other.col_end() <= self.col
            || self.row_end() <= other.row
            || other.row_end() <= self.row)
    }
}

fn default_grid_columns() -> u32 {
    DEFAULT_GRID_COLUMNS
}

fn default_grid_rows() -> u32 {
    DEFAULT_GRID_ROWS
}

fn default_gap() -> u32 {
    DEFAULT_GAP_PX
}

fn default_min_cell_height() -> u32 {
    DEFAULT_MIN_CELL_HEIGHT_PX
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    #[serde(default = "default_grid_columns")]
    pub grid_columns: u32,
    #[serde(default = "default_grid_rows")]
    pub grid_rows: u32,
    #[serde(default = "default_gap")]
    pub gap: u32,
    #[serde(default = "default_min_cell_height")]
    pub min_cell_height: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            grid_columns: default_grid_columns(),
            grid_rows: default_grid_rows(),
            gap: default_gap(),
            min_cell_height: default_min_cell_height(),
        }
    }
}

impl DashboardConfig {
    pub fn with_grid(grid_columns: u32, grid_rows: u32) -> Self {
        Self {
            grid_columns,
            grid_rows,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeHandle {
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DragState {
    pub is_dragging: bool,
    pub active_widget_id: Option<String>,
    pub ghost_position: Option<Position>,
}

impl DragState {
    pub fn is_idle(&self) -> bool {
        !self.is_dragging && self.active_widget_id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResizeState {
    pub is_resizing: bool,
    pub active_widget_id: Option<String>,
    pub resize_handle: Option<ResizeHandle>,
}

impl ResizeState {
    pub fn is_idle(&self) -> bool {
        !self.is_resizing && self.active_widget_id.is_none()
    }
}

/// Immutable copy of the settled widget/grid state handed to readers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutSnapshot {
    pub widgets: Vec<Widget>,
    pub config: DashboardConfig,
}

/// Destination for debounced layout snapshots.
pub trait SnapshotSink: Send + Sync {
    fn save_snapshot(&self, snapshot: &LayoutSnapshot) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn widget_serializes_with_camel_case_fields() {
        let widget = Widget::new("w1", WidgetKind::LineChart, Position::new(1, 2))
            .with_span(4, 2)
            .with_title("Revenue");
        let value = serde_json::to_value(&widget).expect("serialize");
        assert_eq!(value["type"], json!("lineChart"));
        assert_eq!(value["gridColumn"], json!(1));
        assert_eq!(value["gridRow"], json!(2));
        assert_eq!(value["colSpan"], json!(4));
        assert_eq!(value["rowSpan"], json!(2));
        assert!(value.get("minWidth").is_none());
    }

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let cfg: DashboardConfig =
            serde_json::from_value(json!({"gridColumns": 6, "gridRows": 4})).expect("parse");
        assert_eq!(cfg.grid_columns, 6);
        assert_eq!(cfg.grid_rows, 4);
        assert_eq!(cfg.gap, DEFAULT_GAP_PX);
        assert_eq!(cfg.min_cell_height, DEFAULT_MIN_CELL_HEIGHT_PX);
    }

    #[test]
    fn edge_touching_rects_do_not_overlap() {
        let left = CellRect::new(1, 1, 2, 1);
        let right = CellRect::new(3, 1, 2, 1);
        let below = CellRect::new(1, 2, 2, 1);
        assert!(!left.overlaps(&right));
        assert!(!left.overlaps(&below));
        assert!(left.overlaps(&CellRect::new(2, 1, 1, 1)));
    }

    #[test]
    fn clamp_span_respects_constraints() {
        let mut widget = Widget::new("w", WidgetKind::Metric, Position::new(1, 1));
        widget.min_width = Some(2);
        widget.max_width = Some(4);
        widget.max_height = Some(3);
        assert_eq!(widget.clamp_span(1, 9), (2, 3));
        assert_eq!(widget.clamp_span(8, 0), (4, 1));
    }

    #[test]
    fn widget_kind_parses_loose_spellings() {
        assert_eq!("line-chart".parse::<WidgetKind>(), Ok(WidgetKind::LineChart));
        assert_eq!("BarChart".parse::<WidgetKind>(), Ok(WidgetKind::BarChart));
        assert!("gauge".parse::<WidgetKind>().is_err());
    }
}
