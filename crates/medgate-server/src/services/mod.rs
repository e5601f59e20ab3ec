//! Business logic behind the HTTP handlers.

mod external;
mod patch;
mod patient;

pub use external::ExternalPatientService;
pub use patch::PatientPatch;
pub use patient::{PatientPage, PatientService, project, to_fhir};
