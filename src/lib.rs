/// Validation of low-cost snow scales against reference SWE instruments.
///
/// The crate loads field data, removes the scale's thermal drift, aligns it
/// with a reference instrument and reports agreement statistics.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod report;
