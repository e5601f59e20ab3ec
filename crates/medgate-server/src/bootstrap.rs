//! Optional demo data loaded at startup.
//!
//! The documents are embedded with `include_str!` and inserted only when no
//! live row with the same name, gender and birth date exists, so restarts do
//! not duplicate them.

use medgate_core::Patient;
use medgate_storage::DynPatientStore;
use tracing::{info, warn};

use crate::services::project;

const DEMO_PATIENTS: &[(&str, &str)] = &[
    (
        "patient-doe.json",
        include_str!("../resources/demo/patient-doe.json"),
    ),
    (
        "patient-smith.json",
        include_str!("../resources/demo/patient-smith.json"),
    ),
    (
        "patient-brown.json",
        include_str!("../resources/demo/patient-brown.json"),
    ),
];

/// Inserts the demo patients that are not present yet. Returns how many were
/// inserted. Failures are logged and skipped.
pub async fn seed_demo_patients(store: &DynPatientStore) -> usize {
    let mut inserted = 0;
    for (name, json) in DEMO_PATIENTS {
        let record = match Patient::from_slice(json.as_bytes()).and_then(|p| project(&p)) {
            Ok(record) => record,
            Err(e) => {
                warn!(resource = name, error = %e, "Skipping invalid demo patient");
                continue;
            }
        };

        match store.exists_matching(&record.columns).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!(resource = name, error = %e, "Failed to check for existing demo patient");
                continue;
            }
        }

        match store.insert(record).await {
            Ok(row) => {
                inserted += 1;
                info!(resource = name, patient_id = row.id, "Seeded demo patient");
            }
            Err(e) => warn!(resource = name, error = %e, "Failed to seed demo patient"),
        }
    }
    info!(inserted, "Demo patient seeding complete");
    inserted
}
