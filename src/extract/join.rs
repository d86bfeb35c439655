use crate::extract::records::{DailyCheckRecord, JoinedActivityRow, ReferenceRecord};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub rows: Vec<JoinedActivityRow>,
    pub dropped: Vec<DailyCheckRecord>,
}

/// Inner join of daily checks against the reference table on `ref_id = id`,
/// keeping the order of `checks`. Unmatched checks are returned separately.
pub fn inner_join(checks: Vec<DailyCheckRecord>, references: &[ReferenceRecord]) -> JoinOutcome {
    let by_id = references
        .iter()
        .map(|reference| (reference.id.as_str(), reference))
        .collect::<HashMap<_, _>>();

    checks
        .into_iter()
        .fold(JoinOutcome::default(), |mut outcome, check| {
            match by_id.get(check.ref_id.as_str()) {
                Some(reference) => outcome.rows.push(JoinedActivityRow::new(check, reference)),
                None => outcome.dropped.push(check),
            }
            outcome
        })
}
