//! Project tree: unit registry, on-disk layout, discovery and charts.

pub mod chart;
pub mod discovery;
pub mod paths;
pub mod unit;

pub use chart::{Chart, all_charts, service_charts, unit_charts};
pub use discovery::Project;
pub use paths::UnitPaths;
pub use unit::{Unit, UnitId, UnitTree};
