//! Contribution scoring.
//!
//! Each qualifying agent brings a confidence `conf(a)` and a set of credited
//! capabilities `C(a)`. With `U` the union of all credited capabilities:
//!
//! ```text
//! score(a)      = conf(a) * |C(a)| / |U|
//! team_coverage = min(1, sum of conf(a) over agents that add a capability)
//! ```
//!
//! For coverage, agents are taken by descending confidence; an agent counts
//! once, and only if it credits a capability no more confident agent
//! already covers. A lone agent is therefore gated on its own confidence,
//! however many capabilities it lists, while complementary agents can
//! qualify together when none clears the threshold alone.

use std::collections::BTreeSet;

/// Scores for one selection round
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    /// One score per candidate, in candidate order
    pub per_agent: Vec<f64>,
    pub team_coverage: f64,
}

/// Score candidates given as `(confidence, credited capabilities)`
pub fn score(candidates: &[(f64, Vec<String>)]) -> Scores {
    let union: BTreeSet<&str> = candidates
        .iter()
        .flat_map(|(_, caps)| caps.iter().map(String::as_str))
        .collect();

    if union.is_empty() {
        return Scores {
            per_agent: vec![0.0; candidates.len()],
            team_coverage: 0.0,
        };
    }

    let mut covered: BTreeSet<&str> = BTreeSet::new();
    let mut coverage = 0.0_f64;
    for index in rank(&candidates.iter().map(|(c, _)| *c).collect::<Vec<_>>()) {
        let (confidence, caps) = &candidates[index];
        let mut adds = false;
        for cap in caps {
            adds |= covered.insert(cap.as_str());
        }
        if adds {
            coverage += *confidence;
        }
    }

    let per_agent = candidates
        .iter()
        .map(|(confidence, caps)| {
            let distinct: BTreeSet<&str> = caps.iter().map(String::as_str).collect();
            confidence * distinct.len() as f64 / union.len() as f64
        })
        .collect();

    Scores {
        per_agent,
        team_coverage: coverage.min(1.0),
    }
}

/// Candidate indices ordered by descending score; ties keep input order
pub fn rank(per_agent: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..per_agent.len()).collect();
    order.sort_by(|&a, &b| {
        per_agent[b]
            .partial_cmp(&per_agent[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}
