pub mod bundle;
pub mod date;
pub mod error;
pub mod patient;
pub mod sanitize;

pub use bundle::{Bundle, BundleEntry};
pub use date::{format_date, parse_date};
pub use error::{CoreError, ErrorCategory, Result};
pub use patient::{AdministrativeGender, HumanName, Patient, PATIENT_RESOURCE_TYPE};
pub use sanitize::strip_nul;
