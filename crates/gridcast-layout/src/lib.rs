pub mod autosave;
pub mod error;
pub mod geometry;
pub mod store;

pub use autosave::AutoSaveHandle;
pub use error::PlacementError;
pub use gridcast_core::SnapshotSink;
pub use geometry::{
    find_available_position, is_valid_position, occupied_columns, occupied_rows,
    pointer_to_grid_position, ContainerRect,
};
pub use store::{LayoutOptions, ObserverId, StoreEvent, WidgetPatch, WidgetStore};
