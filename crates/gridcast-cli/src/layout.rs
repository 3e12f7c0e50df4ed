use anyhow::{bail, Context, Result};
use clap::Subcommand;
use gridcast_core::{DashboardConfig, LayoutSnapshot, Position, Widget, WidgetKind};
use gridcast_layout::{find_available_position, occupied_rows, WidgetStore};
use gridcast_storage::{DashboardPersistence, KvStore};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Subcommand, Debug, Clone)]
pub enum LayoutCommand {
    /// Print the widgets, back to front
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Place a new widget; without --col/--row it takes the first free slot
    Add {
        kind: WidgetKind,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        col: Option<u32>,
        #[arg(long)]
        row: Option<u32>,
        #[arg(long)]
        cols: Option<u32>,
        #[arg(long)]
        rows: Option<u32>,
        #[arg(long)]
        title: Option<String>,
    },
    Move {
        id: String,
        col: u32,
        row: u32,
    },
    Resize {
        id: String,
        cols: u32,
        rows: u32,
    },
    Remove {
        id: String,
    },
    Duplicate {
        id: String,
    },
    /// Raise a widget above all others
    Front {
        id: String,
    },
    /// Lower a widget beneath all others
    Back {
        id: String,
    },
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
    },
}

impl LayoutCommand {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            LayoutCommand::Show { .. } | LayoutCommand::Export { .. } | LayoutCommand::Import { .. }
        )
    }
}

/// A widget store hydrated from persistence.
pub struct Workspace<S> {
    pub store: WidgetStore,
    pub persistence: DashboardPersistence<S>,
}

impl<S: KvStore> Workspace<S> {
    pub fn open(persistence: DashboardPersistence<S>) -> Self {
        let mut store = WidgetStore::new(DashboardConfig::default());
        if let Some(state) = persistence.load() {
            for warning in store.load_snapshot(state.into_snapshot()) {
                warn!("layout_entry_dropped: {warning}");
            }
        }
        Self { store, persistence }
    }

    pub fn save(&self) -> Result<()> {
        let LayoutSnapshot { widgets, config } = self.store.snapshot();
        if !self.persistence.save(&widgets, &config) {
            bail!("failed to persist dashboard");
        }
        Ok(())
    }

    fn reload(&mut self) {
        let snapshot = self
            .persistence
            .load()
            .map(|state| state.into_snapshot())
            .unwrap_or_default();
        for warning in self.store.load_snapshot(snapshot) {
            warn!("layout_entry_dropped: {warning}");
        }
    }

    /// Run one command and return what should be printed.
    pub fn execute(&mut self, command: LayoutCommand) -> Result<String> {
        let mutates = command.mutates();
        let output = match command {
            LayoutCommand::Show { json } => {
                if json {
                    serde_json::to_string_pretty(&self.store.snapshot().widgets)
                        .context("encode widgets")?
                } else {
                    render_table(&self.store)
                }
            }
            LayoutCommand::Add {
                kind,
                id,
                col,
                row,
                cols,
                rows,
                title,
            } => {
                let (default_cols, default_rows) = kind.default_span();
                let config = self.store.config();
                let col_span = cols.unwrap_or(default_cols).min(config.grid_columns).max(1);
                let row_span = rows.unwrap_or(default_rows).max(1);
                let position = match (col, row) {
                    (Some(col), Some(row)) => Position::new(col, row),
                    (None, None) => self.free_slot(col_span, row_span),
                    _ => bail!("--col and --row must be given together"),
                };
                let id = id.unwrap_or_else(|| format!("widget-{}", Uuid::new_v4().simple()));
                let mut widget = Widget::new(id.clone(), kind, position).with_span(col_span, row_span);
                if let Some(title) = title {
                    widget = widget.with_title(title);
                }
                self.store
                    .add_widget(widget)
                    .with_context(|| format!("add {id}"))?;
                format!("added {id} at {position}")
            }
            LayoutCommand::Move { id, col, row } => {
                let position = Position::new(col, row);
                self.store
                    .move_widget(&id, position)
                    .with_context(|| format!("move {id}"))?;
                format!("moved {id} to {position}")
            }
            LayoutCommand::Resize { id, cols, rows } => {
                self.store
                    .resize_widget(&id, cols, rows)
                    .with_context(|| format!("resize {id}"))?;
                let widget = self
                    .store
                    .widget(&id)
                    .with_context(|| format!("resize {id}"))?;
                format!("resized {id} to {}x{}", widget.col_span, widget.row_span)
            }
            LayoutCommand::Remove { id } => {
                self.store
                    .remove_widget(&id)
                    .with_context(|| format!("remove {id}"))?;
                self.persistence.content().remove(&id);
                format!("removed {id}")
            }
            LayoutCommand::Duplicate { id } => {
                let copy = self
                    .store
                    .duplicate_widget(&id)
                    .with_context(|| format!("duplicate {id}"))?;
                format!("duplicated {id} as {copy}")
            }
            LayoutCommand::Front { id } => {
                self.store
                    .bring_to_front(&id)
                    .with_context(|| format!("front {id}"))?;
                format!("{id} is now frontmost")
            }
            LayoutCommand::Back { id } => {
                self.store
                    .send_to_back(&id)
                    .with_context(|| format!("back {id}"))?;
                format!("{id} is now backmost")
            }
            LayoutCommand::Export { out } => {
                let Some(text) = self.persistence.export_dashboard() else {
                    bail!("nothing to export");
                };
                match out {
                    Some(path) => {
                        std::fs::write(&path, text)
                            .with_context(|| format!("write {}", path.display()))?;
                        format!("exported to {}", path.display())
                    }
                    None => text,
                }
            }
            LayoutCommand::Import { path } => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?;
                if !self.persistence.import_dashboard(&text) {
                    bail!("{} is not a valid dashboard export", path.display());
                }
                self.reload();
                format!(
                    "imported {} widgets from {}",
                    self.store.widgets().len(),
                    path.display()
                )
            }
        };

        if mutates {
            self.save()?;
            info!(widgets = self.store.widgets().len(), "layout_updated");
        }
        Ok(output)
    }

    /// First gap that fits, else the row below everything; the store grows
    /// the grid for the latter.
    fn free_slot(&self, col_span: u32, row_span: u32) -> Position {
        let config = self.store.config();
        find_available_position(
            col_span,
            row_span,
            config.grid_columns,
            config.grid_rows,
            self.store.widgets(),
        )
        .unwrap_or_else(|| Position::new(1, occupied_rows(self.store.widgets()).saturating_add(1)))
    }
}

fn render_table(store: &WidgetStore) -> String {
    let config = store.config();
    let mut out = format!(
        "grid {}x{} (gap {}px)\n",
        config.grid_columns, config.grid_rows, config.gap
    );
    if store.widgets().is_empty() {
        out.push_str("no widgets\n");
        return out;
    }
    let _ = writeln!(
        out,
        "{:<40} {:<10} {:<8} {:<6} {:<4} TITLE",
        "ID", "TYPE", "AT", "SPAN", "Z"
    );
    for widget in store.widgets_by_z() {
        let span = format!("{}x{}", widget.col_span, widget.row_span);
        let lock = if widget.locked { " [locked]" } else { "" };
        let _ = writeln!(
            out,
            "{:<40} {:<10} {:<8} {:<6} {:<4} {}{}",
            widget.id,
            widget.kind.as_str(),
            widget.position().to_string(),
            span,
            store.z_rank(&widget.id).unwrap_or_default(),
            widget.title.as_deref().unwrap_or("-"),
            lock
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcast_core::WidgetContentStore;
    use gridcast_storage::MemoryKvStore;
    use std::sync::Arc;

    fn workspace(kv: &Arc<MemoryKvStore>) -> Workspace<Arc<MemoryKvStore>> {
        Workspace::open(DashboardPersistence::new(
            Arc::clone(kv),
            WidgetContentStore::new(),
        ))
    }

    fn add(id: &str, kind: WidgetKind, col: u32, row: u32) -> LayoutCommand {
        LayoutCommand::Add {
            kind,
            id: Some(id.to_string()),
            col: Some(col),
            row: Some(row),
            cols: None,
            rows: None,
            title: None,
        }
    }

    #[test]
    fn commands_persist_between_workspaces() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let mut ws = workspace(&kv);
            ws.execute(add("kpi", WidgetKind::Metric, 1, 1)).expect("add kpi");
            ws.execute(add("chart", WidgetKind::LineChart, 4, 1)).expect("add chart");
            ws.execute(LayoutCommand::Move {
                id: "kpi".to_string(),
                col: 1,
                row: 4,
            })
            .expect("move");
        }

        let ws = workspace(&kv);
        let kpi = ws.store.widget("kpi").expect("kpi survives");
        assert_eq!(kpi.position(), Position::new(1, 4));
        assert_eq!(ws.store.widgets().len(), 2);
    }

    #[test]
    fn overlapping_add_fails_without_writing() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut ws = workspace(&kv);
        ws.execute(add("a", WidgetKind::Metric, 1, 1)).expect("add a");
        let writes = kv.writes();

        let err = ws
            .execute(add("b", WidgetKind::Metric, 2, 2))
            .expect_err("overlap");
        assert!(format!("{err:#}").contains("add b"));
        assert_eq!(kv.writes(), writes);
    }

    #[test]
    fn add_without_position_takes_first_free_slot() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut ws = workspace(&kv);
        ws.execute(add("title", WidgetKind::Title, 1, 1)).expect("add title");
        let output = ws
            .execute(LayoutCommand::Add {
                kind: WidgetKind::Metric,
                id: Some("kpi".to_string()),
                col: None,
                row: None,
                cols: None,
                rows: None,
                title: Some("Revenue".to_string()),
            })
            .expect("auto add");
        assert_eq!(output, "added kpi at col 1 row 2");
    }

    #[test]
    fn half_given_position_is_rejected() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut ws = workspace(&kv);
        let result = ws.execute(LayoutCommand::Add {
            kind: WidgetKind::Metric,
            id: None,
            col: Some(3),
            row: None,
            cols: None,
            rows: None,
            title: None,
        });
        assert!(result.is_err());
        assert!(ws.store.widgets().is_empty());
    }

    #[test]
    fn front_and_back_change_show_order() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut ws = workspace(&kv);
        ws.execute(add("a", WidgetKind::Metric, 1, 1)).expect("a");
        ws.execute(add("b", WidgetKind::Metric, 4, 1)).expect("b");
        ws.execute(LayoutCommand::Back { id: "b".to_string() })
            .expect("back");

        let table = ws.execute(LayoutCommand::Show { json: false }).expect("show");
        let b = table.find("\nb ").expect("b row");
        let a = table.find("\na ").expect("a row");
        assert!(b < a);
    }

    #[test]
    fn export_then_import_round_trips_through_a_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("dashboard.json");
        let source = Arc::new(MemoryKvStore::new());
        let mut ws = workspace(&source);
        ws.execute(add("chart", WidgetKind::BarChart, 1, 1)).expect("add");
        ws.execute(LayoutCommand::Export {
            out: Some(path.clone()),
        })
        .expect("export");

        let target = Arc::new(MemoryKvStore::new());
        let mut other = workspace(&target);
        let output = other
            .execute(LayoutCommand::Import { path })
            .expect("import");
        assert!(output.starts_with("imported 1 widgets"));
        assert!(other.store.widget("chart").is_some());
    }

    #[test]
    fn export_of_empty_store_fails() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut ws = workspace(&kv);
        assert!(ws.execute(LayoutCommand::Export { out: None }).is_err());
    }
}
