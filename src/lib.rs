//! Arrival predictions and line routes from the TfL API into a warehouse.
//!
//! Data flows `fetch` → `extract` → `normalize` → `load`; [`pipeline`] wires
//! one run together.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod load;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod rows;
pub mod snapshot;
