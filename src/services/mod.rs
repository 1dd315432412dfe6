//! Services layer
//!
//! Business logic between the HTTP routes and the [`Store`](crate::store::Store).
//!
//! ## Services
//!
//! - **Agreements**: the agreement aggregate and its permission checks
//! - **Users**: registration, profiles and credential checks
//! - **OrgUnits**: establecimientos
//! - **WorkLines**: find-or-create catalog of indicator tags
//! - **Evidence**: PDF evidence files on disk
//! - **Workbook**: xlsx template export and bulk import

pub mod agreements;
pub mod dates;
pub mod evidence;
pub mod org_units;
pub mod users;
pub mod views;
pub mod work_lines;
pub mod workbook;

pub use agreements::{
    AgreementService, Assignment, CreateAgreementInput, DimensionInput, IndicatorInput,
    TaskInput, UpdateAgreementInput, UpdateDimensionInput, UpdateIndicatorInput, UpdateTaskInput,
};
pub use evidence::{EvidenceStore, EvidenceUpload};
pub use org_units::OrgUnitService;
pub use users::{RegisterUserInput, UpdateUserInput, UserService};
pub use views::{AgreementSummaryView, AgreementView, OrgUnitView, UserView};
