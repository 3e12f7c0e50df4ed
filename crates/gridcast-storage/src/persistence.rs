use crate::{KvStore, StorageError};
use chrono::Utc;
use gridcast_core::{DashboardConfig, LayoutSnapshot, SnapshotSink, Widget, WidgetContentStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const DEFAULT_STATE_KEY: &str = "dashboard:state";
pub const DEFAULT_VERSION_KEY: &str = "dashboard:version";
pub const CURRENT_LAYOUT_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceOptions {
    pub state_key: String,
    pub version_key: String,
    pub version: String,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            state_key: DEFAULT_STATE_KEY.to_string(),
            version_key: DEFAULT_VERSION_KEY.to_string(),
            version: CURRENT_LAYOUT_VERSION.to_string(),
        }
    }
}

/// Persisted dashboard record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub widgets: Vec<Widget>,
    pub config: DashboardConfig,
    #[serde(default)]
    pub widget_data: BTreeMap<String, Value>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

impl DashboardState {
    pub fn into_snapshot(self) -> LayoutSnapshot {
        LayoutSnapshot {
            widgets: self.widgets,
            config: self.config,
        }
    }
}

/// Versioned save/load of the dashboard layout plus the out-of-band widget
/// content. Every failure is logged and reported through a sentinel return.
pub struct DashboardPersistence<S> {
    store: S,
    options: PersistenceOptions,
    content: WidgetContentStore,
}

impl<S: KvStore> DashboardPersistence<S> {
    pub fn new(store: S, content: WidgetContentStore) -> Self {
        Self::with_options(store, content, PersistenceOptions::default())
    }

    pub fn with_options(store: S, content: WidgetContentStore, options: PersistenceOptions) -> Self {
        Self {
            store,
            options,
            content,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn content(&self) -> &WidgetContentStore {
        &self.content
    }

    pub fn options(&self) -> &PersistenceOptions {
        &self.options
    }

    pub fn save(&self, widgets: &[Widget], config: &DashboardConfig) -> bool {
        let state = DashboardState {
            widgets: widgets.to_vec(),
            config: *config,
            widget_data: self.content.snapshot(),
            version: self.options.version.clone(),
            saved_at: Some(Utc::now().to_rfc3339()),
        };
        match self.write_state(&state) {
            Ok(()) => {
                debug!(widgets = widgets.len(), "dashboard_saved");
                true
            }
            Err(err) => {
                warn!("dashboard_save_failed: {err}");
                false
            }
        }
    }

    /// Returns the stored layout, restoring its widget content as a side effect.
    /// A record written under another version is deleted.
    pub fn load(&self) -> Option<DashboardState> {
        match self.read_state() {
            Ok(Some(state)) => {
                self.content.restore(state.widget_data.clone());
                Some(state)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("dashboard_load_failed: {err}");
                None
            }
        }
    }

    pub fn export_dashboard(&self) -> Option<String> {
        let state = match self.read_state() {
            Ok(state) => state?,
            Err(err) => {
                warn!("dashboard_export_failed: {err}");
                return None;
            }
        };
        let mut value = match serde_json::to_value(&state) {
            Ok(value) => value,
            Err(err) => {
                warn!("dashboard_export_failed: {err}");
                return None;
            }
        };
        if let Value::Object(map) = &mut value {
            map.insert(
                "exportedAt".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        serde_json::to_string_pretty(&value)
            .map_err(|err| warn!("dashboard_export_failed: {err}"))
            .ok()
    }

    /// Parse exported text and persist it as the current layout.
    pub fn import_dashboard(&self, text: &str) -> bool {
        let parsed = serde_json::from_str::<Value>(text)
            .map_err(|err| StorageError::Serialization(err.to_string()))
            .and_then(|value| {
                validate_shape(&value)?;
                serde_json::from_value::<DashboardState>(value)
                    .map_err(|err| StorageError::InvalidState(err.to_string()))
            });
        let state = match parsed {
            Ok(state) => state,
            Err(err) => {
                warn!("dashboard_import_rejected: {err}");
                return false;
            }
        };
        self.content.restore(state.widget_data);
        self.save(&state.widgets, &state.config)
    }

    pub fn clear(&self) -> bool {
        let result = self
            .store
            .remove(&self.options.state_key)
            .and_then(|()| self.store.remove(&self.options.version_key));
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("dashboard_clear_failed: {err}");
                false
            }
        }
    }

    fn write_state(&self, state: &DashboardState) -> Result<(), StorageError> {
        let encoded =
            serde_json::to_string(state).map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.store.set_many(&[
            (self.options.state_key.as_str(), encoded.as_str()),
            (self.options.version_key.as_str(), self.options.version.as_str()),
        ])
    }

    fn read_state(&self) -> Result<Option<DashboardState>, StorageError> {
        let Some(raw) = self.store.get(&self.options.state_key)? else {
            return Ok(None);
        };
        let stored_version = self.store.get(&self.options.version_key)?;
        if stored_version.as_deref() != Some(self.options.version.as_str()) {
            info!(
                stored = stored_version.as_deref().unwrap_or("none"),
                current = %self.options.version,
                "dashboard_version_mismatch"
            );
            self.store.remove(&self.options.state_key)?;
            self.store.remove(&self.options.version_key)?;
            return Ok(None);
        }

        let value: Value =
            serde_json::from_str(&raw).map_err(|err| StorageError::Serialization(err.to_string()))?;
        validate_shape(&value)?;
        let state: DashboardState = serde_json::from_value(value)
            .map_err(|err| StorageError::InvalidState(err.to_string()))?;
        Ok(Some(state))
    }
}

impl<S: KvStore> SnapshotSink for DashboardPersistence<S> {
    fn save_snapshot(&self, snapshot: &LayoutSnapshot) -> bool {
        self.save(&snapshot.widgets, &snapshot.config)
    }
}

fn validate_shape(value: &Value) -> Result<(), StorageError> {
    if !value.get("widgets").map(Value::is_array).unwrap_or(false) {
        return Err(StorageError::InvalidState("widgets must be an array".to_string()));
    }
    let Some(config) = value.get("config").filter(|config| config.is_object()) else {
        return Err(StorageError::InvalidState("config missing".to_string()));
    };
    for field in ["gridColumns", "gridRows"] {
        if !config.get(field).map(Value::is_u64).unwrap_or(false) {
            return Err(StorageError::InvalidState(format!("config.{field} missing")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKvStore;
    use gridcast_core::{Position, WidgetKind};
    use serde_json::json;
    use std::sync::Arc;

    fn sample_widgets() -> Vec<Widget> {
        vec![
            Widget::new("title", WidgetKind::Title, Position::new(1, 1)).with_title("Ops"),
            Widget::new("chart", WidgetKind::LineChart, Position::new(1, 2)).with_span(6, 3),
        ]
    }

    fn persistence() -> (Arc<MemoryKvStore>, DashboardPersistence<Arc<MemoryKvStore>>) {
        let kv = Arc::new(MemoryKvStore::new());
        let persistence = DashboardPersistence::new(Arc::clone(&kv), WidgetContentStore::new());
        (kv, persistence)
    }

    #[test]
    fn save_then_load_restores_layout_and_content() {
        let (_kv, persistence) = persistence();
        persistence.content().set("job-7", json!({"status": "COMPLETED"}));
        let config = DashboardConfig::with_grid(12, 10);
        assert!(persistence.save(&sample_widgets(), &config));

        persistence.content().restore(BTreeMap::new());
        let state = persistence.load().expect("stored state");
        assert_eq!(state.widgets, sample_widgets());
        assert_eq!(state.config, config);
        assert_eq!(state.version, CURRENT_LAYOUT_VERSION);
        assert!(state.saved_at.is_some());
        assert_eq!(
            persistence.content().get("job-7"),
            Some(json!({"status": "COMPLETED"}))
        );
    }

    #[test]
    fn version_mismatch_discards_stored_record() {
        let (kv, persistence) = persistence();
        assert!(persistence.save(&sample_widgets(), &DashboardConfig::default()));
        kv.raw_insert(DEFAULT_VERSION_KEY, "0");

        assert!(persistence.load().is_none());
        assert!(!kv.contains(DEFAULT_STATE_KEY));
        assert!(!kv.contains(DEFAULT_VERSION_KEY));
    }

    #[test]
    fn structurally_invalid_record_loads_as_none() {
        let (kv, persistence) = persistence();
        kv.raw_insert(DEFAULT_VERSION_KEY, CURRENT_LAYOUT_VERSION);
        kv.raw_insert(DEFAULT_STATE_KEY, r#"{"widgets":{},"config":{"gridColumns":12,"gridRows":8}}"#);
        assert!(persistence.load().is_none());

        kv.raw_insert(DEFAULT_STATE_KEY, r#"{"widgets":[],"config":{"gridColumns":12}}"#);
        assert!(persistence.load().is_none());

        kv.raw_insert(DEFAULT_STATE_KEY, "not json");
        assert!(persistence.load().is_none());
        assert!(kv.contains(DEFAULT_STATE_KEY));
    }

    #[test]
    fn unavailable_store_reports_failure_without_panicking() {
        let (kv, persistence) = persistence();
        kv.set_unavailable(true);
        assert!(!persistence.save(&sample_widgets(), &DashboardConfig::default()));
        assert!(persistence.load().is_none());
        assert!(!persistence.clear());
    }

    #[test]
    fn export_is_pretty_and_stamped() {
        let (_kv, persistence) = persistence();
        assert!(persistence.export_dashboard().is_none());
        assert!(persistence.save(&sample_widgets(), &DashboardConfig::default()));

        let text = persistence.export_dashboard().expect("export");
        assert!(text.contains('\n'));
        let value: Value = serde_json::from_str(&text).expect("json");
        assert!(value["exportedAt"].is_string());
        assert_eq!(value["widgets"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn import_validates_then_saves() {
        let (kv, persistence) = persistence();
        assert!(!persistence.import_dashboard(r#"{"widgets":[]}"#));
        assert!(!persistence.import_dashboard("{broken"));
        assert_eq!(kv.writes(), 0);

        let text = json!({
            "widgets": [{"id": "m1", "type": "metric", "gridColumn": 2, "gridRow": 1, "colSpan": 3, "rowSpan": 2}],
            "config": {"gridColumns": 8, "gridRows": 6},
            "widgetData": {"kpi": 42},
            "exportedAt": "2026-01-01T00:00:00Z"
        })
        .to_string();
        assert!(persistence.import_dashboard(&text));

        let state = persistence.load().expect("imported state");
        assert_eq!(state.widgets.len(), 1);
        assert_eq!(state.widgets[0].kind, WidgetKind::Metric);
        assert_eq!(state.config.grid_columns, 8);
        assert_eq!(persistence.content().get("kpi"), Some(json!(42)));
    }

    #[test]
    fn import_without_widget_data_drops_stale_content() {
        let (_kv, persistence) = persistence();
        persistence.content().set("old-widget", json!({"rows": [1, 2, 3]}));

        let text = json!({
            "widgets": [],
            "config": {"gridColumns": 12, "gridRows": 8}
        })
        .to_string();
        assert!(persistence.import_dashboard(&text));
        assert_eq!(persistence.content().get("old-widget"), None);
        assert!(persistence.content().snapshot().is_empty());

        let state = persistence.load().expect("imported state");
        assert!(state.widget_data.is_empty());
    }

    #[test]
    fn state_and_version_are_written_as_one_batch() {
        let (kv, persistence) = persistence();
        let config = DashboardConfig::with_grid(12, 10);
        assert!(persistence.save(&sample_widgets(), &config));

        kv.set_unavailable(true);
        assert!(!persistence.save(&[], &DashboardConfig::default()));
        kv.set_unavailable(false);

        assert_eq!(
            kv.get(DEFAULT_VERSION_KEY).expect("get").as_deref(),
            Some(CURRENT_LAYOUT_VERSION)
        );
        let state = persistence.load().expect("earlier record intact");
        assert_eq!(state.widgets, sample_widgets());
        assert_eq!(state.config, config);
    }

    #[test]
    fn persistence_accepts_autosave_snapshots() {
        let (kv, persistence) = persistence();
        let snapshot = LayoutSnapshot {
            widgets: sample_widgets(),
            config: DashboardConfig::with_grid(12, 9),
        };
        assert!(persistence.save_snapshot(&snapshot));
        assert_eq!(kv.writes(), 2);
        assert_eq!(
            persistence.load().map(DashboardState::into_snapshot),
            Some(snapshot)
        );
    }

    #[test]
    fn clear_removes_both_keys() {
        let (kv, persistence) = persistence();
        assert!(persistence.save(&sample_widgets(), &DashboardConfig::default()));
        assert!(persistence.clear());
        assert!(!kv.contains(DEFAULT_STATE_KEY));
        assert!(!kv.contains(DEFAULT_VERSION_KEY));
        assert!(persistence.load().is_none());
    }
}
