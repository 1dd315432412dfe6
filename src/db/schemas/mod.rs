//! Database schemas
//!
//! Defines MongoDB document structures for users, org units, work lines and
//! agreements. The agreement document embeds its whole dimension, indicator
//! and task subtree.

mod agreement;
mod metadata;
mod org_unit;
mod user;
mod work_line;

pub use agreement::{AgreementDoc, DimensionDoc, IndicatorDoc, TaskDoc, AGREEMENT_COLLECTION};
pub use metadata::Metadata;
pub use org_unit::{OrgUnitDoc, ORG_UNIT_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
pub use work_line::{WorkLineDoc, WORK_LINE_COLLECTION};

/// Collection holding one sequence counter per entity kind
pub const COUNTER_COLLECTION: &str = "counters";
