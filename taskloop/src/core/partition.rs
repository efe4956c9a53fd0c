//! Domain partitioning of failing criteria across parallel workers.
//!
//! Criteria sharing a domain key (`ISC-AUTH-3 -> AUTH`) always travel together.
//! Groups are placed largest first onto the least-loaded worker, so the output
//! depends only on the input order and the worker count.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Criterion;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ISC-(.+)-\d+$").unwrap());

pub const MAX_WORKERS: usize = 16;

/// Number of parallel workers, always within `1..=16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkerCount(usize);

impl WorkerCount {
    pub const ONE: WorkerCount = WorkerCount(1);

    pub fn new(n: usize) -> Result<Self, String> {
        if (1..=MAX_WORKERS).contains(&n) {
            Ok(Self(n))
        } else {
            Err(format!("worker count must be between 1 and {MAX_WORKERS}, got {n}"))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl FromStr for WorkerCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: usize = s
            .parse()
            .map_err(|_| format!("invalid worker count '{s}'"))?;
        Self::new(n)
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Criteria handed to one worker for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    /// 1-based.
    pub worker_id: usize,
    pub criteria: Vec<Criterion>,
}

impl WorkerAssignment {
    /// The criterion named in this worker's prompt.
    pub fn lead(&self) -> Option<&Criterion> {
        self.criteria.first()
    }
}

/// Grouping key of a criterion id. Ids outside the `ISC-{DOMAIN}-{N}` shape
/// are their own domain.
pub fn domain_key(id: &str) -> &str {
    DOMAIN_RE
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map_or(id, |m| m.as_str())
}

/// Split `failing` into at most `workers` assignments, never splitting a domain.
pub fn partition(failing: &[Criterion], workers: WorkerCount) -> Vec<WorkerAssignment> {
    let mut groups: Vec<(&str, Vec<&Criterion>)> = Vec::new();
    for criterion in failing {
        let key = domain_key(&criterion.id);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(criterion),
            None => groups.push((key, vec![criterion])),
        }
    }
    // Stable: equal-sized groups keep first-appearance order.
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let slots = workers.get().min(groups.len());
    let mut assignments: Vec<WorkerAssignment> = (1..=slots)
        .map(|worker_id| WorkerAssignment {
            worker_id,
            criteria: Vec::new(),
        })
        .collect();

    for (_, members) in groups {
        let Some(target) = assignments
            .iter_mut()
            .min_by_key(|a| (a.criteria.len(), a.worker_id))
        else {
            break;
        };
        target.criteria.extend(members.into_iter().cloned());
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CriterionKind, CriterionStatus};

    fn failing(ids: &[&str]) -> Vec<Criterion> {
        ids.iter()
            .map(|id| Criterion {
                id: (*id).to_string(),
                description: format!("{id} works"),
                verify: None,
                kind: CriterionKind::Criterion,
                status: CriterionStatus::Failing,
            })
            .collect()
    }

    fn ids(assignment: &WorkerAssignment) -> Vec<&str> {
        assignment.criteria.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn domain_key_extraction() {
        assert_eq!(domain_key("ISC-AUTH-3"), "AUTH");
        assert_eq!(domain_key("ISC-A-1"), "A");
        assert_eq!(domain_key("ISC-API-V2-10"), "API-V2");
        assert_eq!(domain_key("C4"), "C4");
        assert_eq!(domain_key("ISC-NOPE"), "ISC-NOPE");
    }

    #[test]
    fn balances_whole_domains_across_workers() {
        let input = failing(&["ISC-AUTH-1", "ISC-DB-1", "ISC-UI-1", "ISC-AUTH-2", "ISC-DB-2"]);
        let out = partition(&input, WorkerCount::new(2).expect("count"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].worker_id, 1);
        assert_eq!(ids(&out[0]), ["ISC-AUTH-1", "ISC-AUTH-2", "ISC-UI-1"]);
        assert_eq!(out[1].worker_id, 2);
        assert_eq!(ids(&out[1]), ["ISC-DB-1", "ISC-DB-2"]);
    }

    #[test]
    fn single_failure_gets_one_worker() {
        let input = failing(&["ISC-AUTH-1"]);
        let out = partition(&input, WorkerCount::new(4).expect("count"));
        assert_eq!(out.len(), 1);
        assert_eq!(ids(&out[0]), ["ISC-AUTH-1"]);
        assert_eq!(out[0].lead().map(|c| c.id.as_str()), Some("ISC-AUTH-1"));
    }

    #[test]
    fn assignment_count_is_min_of_workers_and_domains() {
        let input = failing(&["ISC-A-1", "ISC-B-1", "ISC-B-2", "ISC-C-1", "C7"]);
        for w in 1..=6 {
            let out = partition(&input, WorkerCount::new(w).expect("count"));
            assert_eq!(out.len(), w.min(4), "workers={w}");
            assert!(out.iter().all(|a| !a.criteria.is_empty()));
            let total: usize = out.iter().map(|a| a.criteria.len()).sum();
            assert_eq!(total, input.len());
        }
    }

    #[test]
    fn never_splits_a_domain() {
        let input = failing(&["ISC-X-1", "ISC-X-2", "ISC-X-3", "ISC-X-4", "ISC-Y-1"]);
        let out = partition(&input, WorkerCount::new(8).expect("count"));
        assert_eq!(out.len(), 2);
        assert_eq!(ids(&out[0]), ["ISC-X-1", "ISC-X-2", "ISC-X-3", "ISC-X-4"]);
        assert_eq!(ids(&out[1]), ["ISC-Y-1"]);
    }

    #[test]
    fn is_deterministic() {
        let input = failing(&["ISC-P-1", "ISC-Q-1", "ISC-R-1", "ISC-Q-2", "ISC-S-1", "ISC-P-2"]);
        let count = WorkerCount::new(3).expect("count");
        assert_eq!(partition(&input, count), partition(&input, count));
    }

    #[test]
    fn empty_input_yields_no_assignments() {
        assert!(partition(&[], WorkerCount::new(3).expect("count")).is_empty());
    }

    #[test]
    fn worker_count_is_bounded() {
        assert!(WorkerCount::new(0).is_err());
        assert!(WorkerCount::new(17).is_err());
        assert_eq!("16".parse::<WorkerCount>().map(WorkerCount::get), Ok(16));
        assert!("x".parse::<WorkerCount>().is_err());
    }
}
