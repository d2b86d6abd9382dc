//! The slice of the clinical resource format the export pipeline touches:
//! paginated bundles, claims records and error outcomes.

pub mod bundle;
pub mod eob;
pub mod outcome;

pub use bundle::{Bundle, BundleEntry, BundleLink};
pub use eob::{RecordError, EOB_RESOURCE_TYPE};
pub use outcome::{error_line, error_outcome, root_cause_message};
