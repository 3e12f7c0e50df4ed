use crate::autosave::AutoSaveHandle;
use crate::error::PlacementError;
use crate::geometry::{find_available_position, is_valid_position, occupied_columns, occupied_rows};
use gridcast_core::{
    CellRect, DashboardConfig, DragState, LayoutSnapshot, Position, ResizeHandle, ResizeState,
    Widget, WidgetKind,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_GROWTH_BUFFER_ROWS: u32 = 2;
pub const DEFAULT_AUTOSAVE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Empty rows kept below the lowest widget whenever the grid grows.
    pub growth_buffer_rows: u32,
    pub autosave_delay: Duration,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            growth_buffer_rows: DEFAULT_GROWTH_BUFFER_ROWS,
            autosave_delay: Duration::from_millis(DEFAULT_AUTOSAVE_DELAY_MS),
        }
    }
}

/// Field-wise update for [`WidgetStore::update_widget`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetPatch {
    pub grid_column: Option<u32>,
    pub grid_row: Option<u32>,
    pub col_span: Option<u32>,
    pub row_span: Option<u32>,
    pub min_width: Option<Option<u32>>,
    pub max_width: Option<Option<u32>>,
    pub min_height: Option<Option<u32>>,
    pub max_height: Option<Option<u32>>,
    pub kind: Option<WidgetKind>,
    pub title: Option<Option<String>>,
    pub data: Option<Value>,
    pub locked: Option<bool>,
}

impl WidgetPatch {
    pub fn position(position: Position) -> Self {
        Self {
            grid_column: Some(position.grid_column),
            grid_row: Some(position.grid_row),
            ..Self::default()
        }
    }

    pub fn span(col_span: u32, row_span: u32) -> Self {
        Self {
            col_span: Some(col_span),
            row_span: Some(row_span),
            ..Self::default()
        }
    }

    fn apply(&self, widget: &mut Widget) {
        if let Some(value) = self.grid_column {
            widget.grid_column = value;
        }
        if let Some(value) = self.grid_row {
            widget.grid_row = value;
        }
        if let Some(value) = self.col_span {
            widget.col_span = value;
        }
        if let Some(value) = self.row_span {
            widget.row_span = value;
        }
        if let Some(value) = self.min_width {
            widget.min_width = value;
        }
        if let Some(value) = self.max_width {
            widget.max_width = value;
        }
        if let Some(value) = self.min_height {
            widget.min_height = value;
        }
        if let Some(value) = self.max_height {
            widget.max_height = value;
        }
        if let Some(value) = self.kind {
            widget.kind = value;
        }
        if let Some(value) = &self.title {
            widget.title = value.clone();
        }
        if let Some(value) = &self.data {
            widget.data = value.clone();
        }
        if let Some(value) = self.locked {
            widget.locked = value;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added { id: String },
    Removed { id: String },
    Updated { id: String },
    GridResized { config: DashboardConfig },
    ZOrderChanged { id: String, rank: i64 },
    InteractionChanged,
    Loaded { widgets: usize },
}

pub type ObserverId = u64;

type Observer = Box<dyn FnMut(&StoreEvent) + Send>;

/// Authoritative widget/grid state. Every mutation is applied synchronously and
/// either fully succeeds or leaves the store untouched.
pub struct WidgetStore {
    widgets: Vec<Widget>,
    config: DashboardConfig,
    drag: DragState,
    resize: ResizeState,
    z_order: HashMap<String, i64>,
    z_counter: i64,
    options: LayoutOptions,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: ObserverId,
    autosave: Option<AutoSaveHandle>,
}

impl Default for WidgetStore {
    fn default() -> Self {
        Self::new(DashboardConfig::default())
    }
}

impl WidgetStore {
    pub fn new(config: DashboardConfig) -> Self {
        Self::with_options(config, LayoutOptions::default())
    }

    pub fn with_options(config: DashboardConfig, options: LayoutOptions) -> Self {
        Self {
            widgets: Vec::new(),
            config: sanitize_config(config),
            drag: DragState::default(),
            resize: ResizeState::default(),
            z_order: HashMap::new(),
            z_counter: 0,
            options,
            observers: Vec::new(),
            next_observer_id: 1,
            autosave: None,
        }
    }

    pub fn attach_autosave(&mut self, handle: AutoSaveHandle) {
        self.autosave = Some(handle);
    }

    pub fn detach_autosave(&mut self) -> Option<AutoSaveHandle> {
        self.autosave.take()
    }

    pub fn options(&self) -> LayoutOptions {
        self.options
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.widgets.iter().find(|widget| widget.id == id)
    }

    pub fn config(&self) -> DashboardConfig {
        self.config
    }

    pub fn drag_state(&self) -> &DragState {
        &self.drag
    }

    pub fn resize_state(&self) -> &ResizeState {
        &self.resize
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot {
            widgets: self.widgets.clone(),
            config: self.config,
        }
    }

    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&StoreEvent) + Send + 'static,
    {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        before != self.observers.len()
    }

    pub fn add_widget(&mut self, widget: Widget) -> Result<(), PlacementError> {
        validate_shape(&widget)?;
        if self.widget(&widget.id).is_some() {
            return Err(PlacementError::DuplicateId(widget.id));
        }
        let config = self
            .fit_config(widget.rect(), None)
            .ok_or_else(|| PlacementError::PlacementFailed {
                id: widget.id.clone(),
            })?;

        let id = widget.id.clone();
        self.widgets.push(widget);
        self.assign_front_rank(&id);
        self.apply_config(config);
        self.ensure_capacity();
        debug!(widget = %id, "widget_added");
        self.notify(StoreEvent::Added { id });
        self.schedule_save();
        Ok(())
    }

    pub fn remove_widget(&mut self, id: &str) -> Result<Widget, PlacementError> {
        let index = self.index_of(id)?;
        let removed = self.widgets.remove(index);
        self.z_order.remove(id);
        let interacting = self.drag.active_widget_id.as_deref() == Some(id)
            || self.resize.active_widget_id.as_deref() == Some(id);
        if interacting {
            self.reset_interaction_states();
        }
        debug!(widget = %id, "widget_removed");
        self.notify(StoreEvent::Removed { id: id.to_string() });
        self.schedule_save();
        Ok(removed)
    }

    pub fn update_widget(&mut self, id: &str, patch: WidgetPatch) -> Result<(), PlacementError> {
        let index = self.index_of(id)?;
        let current = &self.widgets[index];
        let mut merged = current.clone();
        patch.apply(&mut merged);

        let placement_changed = merged.rect() != current.rect();
        if placement_changed && current.locked && merged.locked {
            return Err(PlacementError::Locked(id.to_string()));
        }
        let mut config = self.config;
        if placement_changed {
            validate_shape(&merged)?;
            config = self
                .fit_config(merged.rect(), Some(id))
                .ok_or_else(|| PlacementError::PlacementFailed { id: id.to_string() })?;
        }

        self.widgets[index] = merged;
        self.apply_config(config);
        if placement_changed {
            self.ensure_capacity();
        }
        self.notify(StoreEvent::Updated { id: id.to_string() });
        self.schedule_save();
        Ok(())
    }

    pub fn move_widget(&mut self, id: &str, position: Position) -> Result<(), PlacementError> {
        let widget = self.unlocked(id)?;
        let (col_span, row_span) = widget.clamp_span(widget.col_span, widget.row_span);
        self.update_widget(
            id,
            WidgetPatch {
                grid_column: Some(position.grid_column),
                grid_row: Some(position.grid_row),
                col_span: Some(col_span),
                row_span: Some(row_span),
                ..WidgetPatch::default()
            },
        )
    }

    pub fn resize_widget(
        &mut self,
        id: &str,
        col_span: u32,
        row_span: u32,
    ) -> Result<(), PlacementError> {
        let widget = self.unlocked(id)?;
        let (col_span, row_span) = widget.clamp_span(col_span, row_span);
        self.update_widget(id, WidgetPatch::span(col_span, row_span))
    }

    /// Clone a widget into the first free slot. The grid is not grown for copies.
    pub fn duplicate_widget(&mut self, id: &str) -> Result<String, PlacementError> {
        let source = self
            .widget(id)
            .ok_or_else(|| PlacementError::NotFound(id.to_string()))?;
        let position = find_available_position(
            source.col_span,
            source.row_span,
            self.config.grid_columns,
            self.config.grid_rows,
            &self.widgets,
        )
        .ok_or_else(|| PlacementError::NoAvailableSpace { id: id.to_string() })?;

        let mut copy = source.clone();
        copy.id = format!("widget-{}", Uuid::new_v4().simple());
        copy.grid_column = position.grid_column;
        copy.grid_row = position.grid_row;
        if let Some(title) = copy.title.as_mut() {
            title.push_str(" (Copy)");
        }

        let new_id = copy.id.clone();
        self.widgets.push(copy);
        self.assign_front_rank(&new_id);
        self.ensure_capacity();
        self.notify(StoreEvent::Added { id: new_id.clone() });
        self.schedule_save();
        Ok(new_id)
    }

    pub fn z_rank(&self, id: &str) -> Option<i64> {
        self.z_order.get(id).copied()
    }

    /// Widgets ordered back-to-front.
    pub fn widgets_by_z(&self) -> Vec<&Widget> {
        let mut ordered: Vec<&Widget> = self.widgets.iter().collect();
        ordered.sort_by_key(|widget| self.z_order.get(&widget.id).copied().unwrap_or(0));
        ordered
    }

    pub fn bring_to_front(&mut self, id: &str) -> Result<i64, PlacementError> {
        let index = self.index_of(id)?;
        let rank = self.assign_front_rank(id);
        let widget = self.widgets.remove(index);
        self.widgets.push(widget);
        self.notify(StoreEvent::ZOrderChanged {
            id: id.to_string(),
            rank,
        });
        self.schedule_save();
        Ok(rank)
    }

    pub fn send_to_back(&mut self, id: &str) -> Result<i64, PlacementError> {
        let index = self.index_of(id)?;
        let lowest = self.z_order.values().copied().min().unwrap_or(0);
        let rank = lowest - 1;
        self.z_order.insert(id.to_string(), rank);
        let widget = self.widgets.remove(index);
        self.widgets.insert(0, widget);
        self.notify(StoreEvent::ZOrderChanged {
            id: id.to_string(),
            rank,
        });
        self.schedule_save();
        Ok(rank)
    }

    pub fn set_drag_state(&mut self, drag: DragState) {
        if drag.is_dragging {
            self.resize = ResizeState::default();
        }
        self.drag = drag;
        self.notify(StoreEvent::InteractionChanged);
    }

    pub fn set_resize_state(&mut self, resize: ResizeState) {
        if resize.is_resizing {
            self.drag = DragState::default();
        }
        self.resize = resize;
        self.notify(StoreEvent::InteractionChanged);
    }

    pub fn reset_interaction_states(&mut self) {
        self.drag = DragState::default();
        self.resize = ResizeState::default();
        self.notify(StoreEvent::InteractionChanged);
    }

    pub fn begin_drag(&mut self, id: &str) -> Result<(), PlacementError> {
        let position = self.unlocked(id)?.position();
        self.set_drag_state(DragState {
            is_dragging: true,
            active_widget_id: Some(id.to_string()),
            ghost_position: Some(position),
        });
        Ok(())
    }

    pub fn update_drag_ghost(&mut self, position: Position) {
        if !self.drag.is_dragging {
            return;
        }
        self.drag.ghost_position = Some(position);
        self.notify(StoreEvent::InteractionChanged);
    }

    /// Drop the dragged widget at its ghost position. Interaction state returns
    /// to idle whether or not the move was accepted.
    pub fn commit_drag(&mut self) -> Result<(), PlacementError> {
        let drag = std::mem::take(&mut self.drag);
        let result = match (drag.active_widget_id, drag.ghost_position) {
            (Some(id), Some(position)) if drag.is_dragging => self.move_widget(&id, position),
            _ => Ok(()),
        };
        self.reset_interaction_states();
        result
    }

    pub fn begin_resize(&mut self, id: &str, handle: ResizeHandle) -> Result<(), PlacementError> {
        self.unlocked(id)?;
        self.set_resize_state(ResizeState {
            is_resizing: true,
            active_widget_id: Some(id.to_string()),
            resize_handle: Some(handle),
        });
        Ok(())
    }

    pub fn commit_resize(&mut self, col_span: u32, row_span: u32) -> Result<(), PlacementError> {
        let resize = std::mem::take(&mut self.resize);
        let result = match resize.active_widget_id {
            Some(id) if resize.is_resizing => self.resize_widget(&id, col_span, row_span),
            _ => Ok(()),
        };
        self.reset_interaction_states();
        result
    }

    /// Change the grid size. Never shrinks below the occupied area plus the row buffer.
    pub fn resize_grid(&mut self, grid_columns: u32, grid_rows: u32) -> DashboardConfig {
        let min_rows = occupied_rows(&self.widgets).saturating_add(self.options.growth_buffer_rows);
        let min_cols = occupied_columns(&self.widgets);
        let config = DashboardConfig {
            grid_columns: grid_columns.max(min_cols).max(1),
            grid_rows: grid_rows.max(min_rows).max(1),
            ..self.config
        };
        if config != self.config {
            self.apply_config(config);
            self.schedule_save();
        }
        self.config
    }

    pub fn set_gap(&mut self, gap: u32) {
        if self.config.gap != gap {
            let config = DashboardConfig { gap, ..self.config };
            self.apply_config(config);
            self.schedule_save();
        }
    }

    /// Replace the store contents with a persisted layout. Entries that are
    /// malformed, duplicated or overlapping are dropped and reported.
    pub fn load_snapshot(&mut self, snapshot: LayoutSnapshot) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut config = sanitize_config(snapshot.config);
        let mut accepted: Vec<Widget> = Vec::with_capacity(snapshot.widgets.len());
        let mut seen = HashSet::new();

        for widget in snapshot.widgets {
            if let Err(err) = validate_shape(&widget) {
                warnings.push(format!("dropping widget '{}': {err}", widget.id));
                continue;
            }
            if !seen.insert(widget.id.clone()) {
                warnings.push(format!("dropping duplicate widget '{}'", widget.id));
                continue;
            }
            let overlaps = accepted
                .iter()
                .any(|other| other.rect().overlaps(&widget.rect()));
            if overlaps {
                warnings.push(format!("dropping overlapping widget '{}'", widget.id));
                continue;
            }
            config = grow_to_fit(config, widget.rect(), self.options.growth_buffer_rows);
            accepted.push(widget);
        }
        for warning in &warnings {
            warn!("layout_load: {warning}");
        }

        self.widgets = accepted;
        self.config = config;
        self.drag = DragState::default();
        self.resize = ResizeState::default();
        self.z_order.clear();
        self.z_counter = 0;
        let ids: Vec<String> = self.widgets.iter().map(|widget| widget.id.clone()).collect();
        for id in &ids {
            self.assign_front_rank(id);
        }
        self.ensure_capacity();
        self.notify(StoreEvent::Loaded {
            widgets: self.widgets.len(),
        });
        warnings
    }

    fn index_of(&self, id: &str) -> Result<usize, PlacementError> {
        self.widgets
            .iter()
            .position(|widget| widget.id == id)
            .ok_or_else(|| PlacementError::NotFound(id.to_string()))
    }

    fn unlocked(&self, id: &str) -> Result<&Widget, PlacementError> {
        let widget = self
            .widget(id)
            .ok_or_else(|| PlacementError::NotFound(id.to_string()))?;
        if widget.locked {
            return Err(PlacementError::Locked(id.to_string()));
        }
        Ok(widget)
    }

    /// Grid configuration under which `rect` fits: the current one, or the
    /// current one grown once to cover the rectangle.
    fn fit_config(&self, rect: CellRect, exclude_id: Option<&str>) -> Option<DashboardConfig> {
        let fits = |config: &DashboardConfig| {
            is_valid_position(
                rect.col,
                rect.row,
                rect.col_span,
                rect.row_span,
                config.grid_columns,
                config.grid_rows,
                &self.widgets,
                exclude_id,
            )
        };
        if fits(&self.config) {
            return Some(self.config);
        }
        let grown = grow_to_fit(self.config, rect, self.options.growth_buffer_rows);
        if grown != self.config && fits(&grown) {
            debug!(
                columns = grown.grid_columns,
                rows = grown.grid_rows,
                "grid_auto_grow"
            );
            return Some(grown);
        }
        None
    }

    fn ensure_capacity(&mut self) {
        let needed_rows = occupied_rows(&self.widgets).saturating_add(self.options.growth_buffer_rows);
        let needed_cols = occupied_columns(&self.widgets);
        if self.config.grid_rows >= needed_rows && self.config.grid_columns >= needed_cols {
            return;
        }
        let config = DashboardConfig {
            grid_columns: self.config.grid_columns.max(needed_cols),
            grid_rows: self.config.grid_rows.max(needed_rows),
            ..self.config
        };
        self.apply_config(config);
    }

    fn apply_config(&mut self, config: DashboardConfig) {
        if config == self.config {
            return;
        }
        self.config = config;
        self.notify(StoreEvent::GridResized { config });
    }

    fn assign_front_rank(&mut self, id: &str) -> i64 {
        self.z_counter += 1;
        self.z_order.insert(id.to_string(), self.z_counter);
        self.z_counter
    }

    fn notify(&mut self, event: StoreEvent) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&event);
        }
    }

    fn schedule_save(&self) {
        if let Some(autosave) = &self.autosave {
            autosave.schedule(self.snapshot());
        }
    }
}

fn validate_shape(widget: &Widget) -> Result<(), PlacementError> {
    if widget.id.trim().is_empty() {
        return Err(PlacementError::InvalidWidget("empty id".to_string()));
    }
    if widget.grid_column < 1 || widget.grid_row < 1 {
        return Err(PlacementError::InvalidWidget(format!(
            "position must be 1-based, got {}",
            widget.position()
        )));
    }
    if widget.col_span < 1 || widget.row_span < 1 {
        return Err(PlacementError::InvalidWidget(format!(
            "span must be positive, got {}x{}",
            widget.col_span, widget.row_span
        )));
    }
    // the exclusive end of the rect must stay representable
    if widget.grid_column.checked_add(widget.col_span).is_none()
        || widget.grid_row.checked_add(widget.row_span).is_none()
    {
        return Err(PlacementError::InvalidWidget(format!(
            "{}x{} at {} runs past the addressable grid",
            widget.col_span,
            widget.row_span,
            widget.position()
        )));
    }
    Ok(())
}

fn sanitize_config(config: DashboardConfig) -> DashboardConfig {
    DashboardConfig {
        grid_columns: config.grid_columns.max(1),
        grid_rows: config.grid_rows.max(1),
        ..config
    }
}

fn grow_to_fit(config: DashboardConfig, rect: CellRect, buffer_rows: u32) -> DashboardConfig {
    let right = rect.col_end().saturating_sub(1);
    let bottom = rect.row_end().saturating_sub(1);
    DashboardConfig {
        grid_columns: config.grid_columns.max(right),
        grid_rows: if bottom > config.grid_rows {
            bottom.saturating_add(buffer_rows)
        } else {
            config.grid_rows
        },
        ..config
    }
}
