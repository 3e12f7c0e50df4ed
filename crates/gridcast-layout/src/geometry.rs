use gridcast_core::{CellRect, Position, Widget};

/// Pixel rectangle of the grid container, as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Returns false when the rectangle leaves `[1, max_cols] x [1, max_rows]` or
/// overlaps any widget other than `exclude_id`.
#[allow(clippy::too_many_arguments)]
pub fn is_valid_position(
    col: u32,
    row: u32,
    col_span: u32,
    row_span: u32,
    max_cols: u32,
    max_rows: u32,
    widgets: &[Widget],
    exclude_id: Option<&str>,
) -> bool {
    if col < 1 || row < 1 || col_span < 1 || row_span < 1 {
        return false;
    }
    let candidate = CellRect::new(col, row, col_span, row_span);
    if candidate.col_end() - 1 > max_cols || candidate.row_end() - 1 > max_rows {
        return false;
    }
    !widgets
        .iter()
        .filter(|widget| Some(widget.id.as_str()) != exclude_id)
        .any(|widget| widget.rect().overlaps(&candidate))
}

/// First free slot in row-major order, or `None` when the current grid is full.
pub fn find_available_position(
    col_span: u32,
    row_span: u32,
    max_cols: u32,
    max_rows: u32,
    widgets: &[Widget],
) -> Option<Position> {
    if col_span < 1 || row_span < 1 || col_span > max_cols || row_span > max_rows {
        return None;
    }
    for row in 1..=(max_rows - row_span + 1) {
        for col in 1..=(max_cols - col_span + 1) {
            if is_valid_position(col, row, col_span, row_span, max_cols, max_rows, widgets, None) {
                return Some(Position::new(col, row));
            }
        }
    }
    None
}

/// Map a pointer coordinate onto the cell underneath it. Padding surrounds
/// the grid on every side and `gap` separates neighbouring cells.
#[allow(clippy::too_many_arguments)]
pub fn pointer_to_grid_position(
    x: f64,
    y: f64,
    container: ContainerRect,
    columns: u32,
    rows: u32,
    gap: f64,
    cell_height: f64,
    padding: f64,
) -> Position {
    let columns = columns.max(1);
    let rows = rows.max(1);
    let inner_width = container.width - padding * 2.0;
    let cell_width = (inner_width - gap * f64::from(columns - 1)) / f64::from(columns);

    let col = axis_index(x - container.left - padding, cell_width + gap, columns);
    let row = axis_index(y - container.top - padding, cell_height + gap, rows);
    Position::new(col, row)
}

fn axis_index(offset: f64, stride: f64, count: u32) -> u32 {
    if !offset.is_finite() || !stride.is_finite() || stride <= 0.0 || offset <= 0.0 {
        return 1;
    }
    let index = (offset / stride).floor() + 1.0;
    if index >= f64::from(count) {
        count
    } else {
        index as u32
    }
}

/// Largest occupied row across all widgets (0 for an empty board).
pub fn occupied_rows(widgets: &[Widget]) -> u32 {
    widgets.iter().map(Widget::bottom_edge).max().unwrap_or(0)
}

/// Largest occupied column across all widgets (0 for an empty board).
pub fn occupied_columns(widgets: &[Widget]) -> u32 {
    widgets.iter().map(Widget::right_edge).max().unwrap_or(0)
}
