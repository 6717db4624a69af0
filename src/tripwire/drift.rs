//! HS-016: Drift detection: compare the platform's object listing to the lock.

use crate::catalog::ObjectKind;
use crate::core::types::{Session, StateLock, StepStatus, StepType};
use crate::platform::{Platform, PlatformError};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A single drift finding.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftFinding {
    pub step_id: String,
    pub step_type: StepType,
    pub object: String,
    pub detail: String,
}

/// Check every converged, object-owning lock entry against the live listing.
///
/// Each object kind is listed once.
pub fn detect_drift(
    lock: &StateLock,
    platform: &mut dyn Platform,
    session: &Session,
) -> Result<Vec<DriftFinding>, PlatformError> {
    let mut listings: HashMap<ObjectKind, HashSet<String>> = HashMap::new();
    let mut findings = Vec::new();

    for (id, sl) in &lock.steps {
        if sl.status != StepStatus::Converged {
            continue;
        }
        let (Some(kind), Some(object)) = (sl.step_type.object_kind(), sl.object.as_deref()) else {
            continue;
        };

        if !listings.contains_key(&kind) {
            let names = platform
                .list_objects(session, kind)?
                .into_iter()
                .map(|n| n.to_uppercase())
                .collect();
            listings.insert(kind, names);
        }
        let present = listings
            .get(&kind)
            .is_some_and(|names| names.contains(&object.to_uppercase()));
        debug!(step = %id, object, present, "drift check");

        if !present {
            findings.push(DriftFinding {
                step_id: id.clone(),
                step_type: sl.step_type,
                object: object.to_string(),
                detail: format!("{} {} no longer exists", kind, object),
            });
        }
    }

    Ok(findings)
}

/// Mark drifted entries so the next plan replaces them.
pub fn mark_drifted(lock: &mut StateLock, findings: &[DriftFinding]) {
    for finding in findings {
        if let Some(sl) = lock.steps.get_mut(&finding.step_id) {
            sl.status = StepStatus::Drifted;
        }
    }
}
