//! panoptes maintains a live, consistent in-memory model of every top-level
//! window belonging to every regular application on a macOS system.
//!
//! Three independent and mutually unreliable OS views of window state (the
//! accessibility tree, the window-server window list, and the on-screen
//! capture surface enumeration) are reconciled into a single authoritative
//! cache, and a stream of differential change events is emitted as that
//! model evolves.

pub mod actor;
pub mod common;
pub mod discovery;
pub mod identity;
pub mod model;
pub mod sys;

pub use actor::tracker::{Tracker, WindowEvent};
pub use common::config::TrackerConfig;
pub use model::record::{ChangeReport, WindowRecord};
pub use sys::window_server::{SpaceId, WindowId};
