//! Two-tier caching for upstream patients.
//!
//! ## Architecture
//!
//! - **L1 Cache (DashMap)**: In-memory, per-instance
//! - **L2 Cache (Redis)**: Network, shared across instances
//!
//! ```text
//! cached GET → L1 (DashMap) → L2 (Redis) → upstream FHIR server
//! ```
//!
//! If Redis is unavailable or disabled, the system falls back to L1-only mode.
//! Cache failures are logged and behave like misses; they never fail a request.

pub mod backend;
pub mod patient;

pub use backend::{CacheBackend, CacheStats, CachedEntry};
pub use patient::{
    BackendPatientCache, DisabledPatientCache, PatientCache, create_patient_cache, patient_key,
};
