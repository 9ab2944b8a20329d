//! Canonicalize pass: collapse `next` chains, merge linked reference
//! results, and resolve the effective results and monikers for every range.
//! Runs after the stream has been fully ingested, so any topological order
//! of definitions before uses is tolerated.

use std::collections::{HashMap, HashSet};

use super::correlator::{Correlator, RawMember};
use super::types::SourceId;

#[derive(Debug, Clone, Default)]
pub struct ResolvedRange {
    pub definition_result: Option<SourceId>,
    pub reference_result: Option<SourceId>,
    pub hover_result: Option<SourceId>,
    pub monikers: Vec<SourceId>,
}

pub struct Canonicalized {
    pub correlator: Correlator,
    /// range id -> fully resolved attachments (reference results already
    /// remapped to their merged representative)
    pub ranges: HashMap<SourceId, ResolvedRange>,
    /// representative reference result id -> merged member list
    pub reference_members: HashMap<SourceId, Vec<RawMember>>,
}

pub fn canonicalize(correlator: Correlator) -> Canonicalized {
    let canonical = merge_reference_results(&correlator);
    let reference_members = merged_members(&correlator, &canonical);

    let mut set_cache: HashMap<SourceId, ResolvedRange> = HashMap::new();
    let mut ranges = HashMap::with_capacity(correlator.ranges.len());

    for (id, range) in &correlator.ranges {
        let mut resolved = ResolvedRange {
            definition_result: range.definition_result.clone(),
            reference_result: range.reference_result.clone(),
            hover_result: range.hover_result.clone(),
            monikers: range.monikers.clone(),
        };

        if let Some(next) = &range.next {
            let tail = resolve_set(&correlator, next, &mut set_cache);
            merge_into(&mut resolved, &tail);
        }

        resolved.reference_result = resolved
            .reference_result
            .map(|id| canonical.get(&id).cloned().unwrap_or(id));
        resolved.monikers = close_monikers(&correlator, &resolved.monikers);

        ranges.insert(id.clone(), resolved);
    }

    Canonicalized {
        correlator,
        ranges,
        reference_members,
    }
}

/// Walk a result-set chain, memoizing the resolved attachments per set.
fn resolve_set(
    correlator: &Correlator,
    id: &SourceId,
    cache: &mut HashMap<SourceId, ResolvedRange>,
) -> ResolvedRange {
    if let Some(hit) = cache.get(id) {
        return hit.clone();
    }

    let mut resolved = ResolvedRange::default();
    let mut visited: HashSet<SourceId> = HashSet::new();
    let mut current = Some(id.clone());

    while let Some(set_id) = current {
        if !visited.insert(set_id.clone()) {
            break;
        }
        let Some(set) = correlator.result_sets.get(&set_id) else {
            break;
        };

        let step = ResolvedRange {
            definition_result: set.definition_result.clone(),
            reference_result: set.reference_result.clone(),
            hover_result: set.hover_result.clone(),
            monikers: set.monikers.clone(),
        };
        merge_into(&mut resolved, &step);
        current = set.next.clone();
    }

    cache.insert(id.clone(), resolved.clone());
    resolved
}

/// Earlier links in the chain win for results; monikers accumulate along the
/// whole chain.
fn merge_into(into: &mut ResolvedRange, from: &ResolvedRange) {
    if into.definition_result.is_none() {
        into.definition_result = from.definition_result.clone();
    }
    if into.reference_result.is_none() {
        into.reference_result = from.reference_result.clone();
    }
    if into.hover_result.is_none() {
        into.hover_result = from.hover_result.clone();
    }
    into.monikers.extend(from.monikers.iter().cloned());
}

/// Union-find over linked reference results; returns every reference result
/// id mapped to its class representative (the smallest id in the class, for
/// determinism).
fn merge_reference_results(correlator: &Correlator) -> HashMap<SourceId, SourceId> {
    let mut parent: HashMap<SourceId, SourceId> = correlator
        .reference_results
        .keys()
        .map(|id| (id.clone(), id.clone()))
        .collect();

    fn find(parent: &mut HashMap<SourceId, SourceId>, id: &SourceId) -> SourceId {
        let mut root = id.clone();
        while parent[&root] != root {
            root = parent[&root].clone();
        }
        // path compression
        let mut current = id.clone();
        while parent[&current] != root {
            let next = parent[&current].clone();
            parent.insert(current, root.clone());
            current = next;
        }
        root
    }

    for (a, b) in &correlator.linked_reference_results {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra != rb {
            let (keep, fold) = if ra < rb { (ra, rb) } else { (rb, ra) };
            parent.insert(fold, keep);
        }
    }

    let ids: Vec<SourceId> = parent.keys().cloned().collect();
    ids.into_iter()
        .map(|id| {
            let root = find(&mut parent, &id);
            (id, root)
        })
        .collect()
}

fn merged_members(
    correlator: &Correlator,
    canonical: &HashMap<SourceId, SourceId>,
) -> HashMap<SourceId, Vec<RawMember>> {
    let mut merged: HashMap<SourceId, Vec<RawMember>> = HashMap::new();
    for (id, members) in &correlator.reference_results {
        let root = canonical.get(id).cloned().unwrap_or_else(|| id.clone());
        let slot = merged.entry(root).or_default();
        for member in members {
            if !slot.contains(member) {
                slot.push(member.clone());
            }
        }
    }
    merged
}

fn close_monikers(correlator: &Correlator, monikers: &[SourceId]) -> Vec<SourceId> {
    let mut seen: HashSet<SourceId> = HashSet::new();
    let mut out = Vec::new();
    for id in monikers {
        for linked in correlator.moniker_closure(id) {
            if seen.insert(linked.clone()) {
                out.push(linked);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsif::types::Element;

    fn build(lines: &[&str]) -> Correlator {
        let mut c = Correlator::default();
        for (i, line) in lines.iter().enumerate() {
            let element: Element = serde_json::from_str(line).unwrap();
            c.insert(i as u64 + 1, element).unwrap();
        }
        c
    }

    #[test]
    fn next_chain_resolution_prefers_nearest() {
        let c = build(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///r"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///r/a.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"range","start":{"line":0,"character":0},"end":{"line":0,"character":3}}"#,
            r#"{"id":4,"type":"vertex","label":"resultSet"}"#,
            r#"{"id":5,"type":"vertex","label":"resultSet"}"#,
            r#"{"id":6,"type":"vertex","label":"hoverResult","result":{"contents":"near"}}"#,
            r#"{"id":7,"type":"vertex","label":"hoverResult","result":{"contents":"far"}}"#,
            r#"{"id":10,"type":"edge","label":"next","outV":3,"inV":4}"#,
            r#"{"id":11,"type":"edge","label":"next","outV":4,"inV":5}"#,
            r#"{"id":12,"type":"edge","label":"textDocument/hover","outV":4,"inV":6}"#,
            r#"{"id":13,"type":"edge","label":"textDocument/hover","outV":5,"inV":7}"#,
        ]);

        let canonicalized = canonicalize(c);
        let resolved = &canonicalized.ranges[&"3".into()];
        assert_eq!(resolved.hover_result, Some("6".into()));
    }

    #[test]
    fn linked_reference_results_merge_members() {
        let c = build(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///r"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///r/a.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"range","start":{"line":0,"character":0},"end":{"line":0,"character":3}}"#,
            r#"{"id":4,"type":"vertex","label":"range","start":{"line":1,"character":0},"end":{"line":1,"character":3}}"#,
            r#"{"id":5,"type":"vertex","label":"referenceResult"}"#,
            r#"{"id":6,"type":"vertex","label":"referenceResult"}"#,
            r#"{"id":20,"type":"edge","label":"item","outV":5,"inVs":[3],"document":2}"#,
            r#"{"id":21,"type":"edge","label":"item","outV":6,"inVs":[4],"document":2}"#,
            r#"{"id":22,"type":"edge","label":"item","outV":5,"inVs":[6],"document":2,"property":"referenceResults"}"#,
            r#"{"id":23,"type":"edge","label":"textDocument/references","outV":3,"inV":5}"#,
            r#"{"id":24,"type":"edge","label":"textDocument/references","outV":4,"inV":6}"#,
        ]);

        let canonicalized = canonicalize(c);

        let a = &canonicalized.ranges[&"3".into()];
        let b = &canonicalized.ranges[&"4".into()];
        assert_eq!(a.reference_result, b.reference_result);

        let members =
            &canonicalized.reference_members[a.reference_result.as_ref().unwrap()];
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn range_monikers_come_before_result_set_monikers() {
        let c = build(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///r"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///r/a.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"range","start":{"line":0,"character":0},"end":{"line":0,"character":3}}"#,
            r#"{"id":4,"type":"vertex","label":"resultSet"}"#,
            r#"{"id":5,"type":"vertex","label":"moniker","scheme":"npm","identifier":"local-one","kind":"local"}"#,
            r#"{"id":6,"type":"vertex","label":"moniker","scheme":"npm","identifier":"exported","kind":"export"}"#,
            r#"{"id":10,"type":"edge","label":"moniker","outV":3,"inV":5}"#,
            r#"{"id":11,"type":"edge","label":"next","outV":3,"inV":4}"#,
            r#"{"id":12,"type":"edge","label":"moniker","outV":4,"inV":6}"#,
        ]);

        let canonicalized = canonicalize(c);
        let resolved = &canonicalized.ranges[&"3".into()];
        assert_eq!(resolved.monikers, vec!["5".into(), "6".into()]);
    }
}
