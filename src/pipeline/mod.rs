//! Import orchestration and exports.

mod dump;
mod importer;

pub use dump::{DistrictEntry, DumpDocument, PoiEntry};
pub use importer::{district_name, import_unit, ImportRequest, ImportResult, ImportSummary, Importer};
