use std::collections::HashMap;

use crate::catalog::Service;
use crate::classify::Verdict;

/// Actionable entries for one owning team, in evaluation order.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamBundle {
    pub team: String,
    pub entries: Vec<(Service, Verdict)>,
}

/// Groups non-Ok entries by owning team.
///
/// Teams appear in first-seen order and entries keep their evaluation order,
/// so repeated runs over the same input produce identical bundles. A team
/// whose services are all Ok produces no bundle.
pub fn group(entries: &[(Service, Verdict)]) -> Vec<TeamBundle> {
    let mut bundles: Vec<TeamBundle> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (service, verdict) in entries {
        if *verdict == Verdict::Ok {
            continue;
        }
        let at = *index.entry(service.team.clone()).or_insert_with(|| {
            bundles.push(TeamBundle {
                team: service.team.clone(),
                entries: Vec::new(),
            });
            bundles.len() - 1
        });
        bundles[at].entries.push((service.clone(), *verdict));
    }
    bundles
}
