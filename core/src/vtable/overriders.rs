//! Final overrider computation for every virtual member function of every
//! base subobject of a class.

use tracing::warn;

use crate::decl::{ClassGraph, ClassId, MethodId};
use crate::record::RecordLayouts;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

/// The method that is actually called for a slot, and where its class lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverriderInfo {
    pub method: MethodId,
    /// Offset of the overrider's class subobject within the layout class
    pub offset: i64,
}

struct Subobject {
    class: ClassId,
    /// Offset within the most derived class
    offset: i64,
    /// Offset within the layout class
    layout_offset: i64,
    bases: Vec<usize>,
}

/// Candidate overriders keyed by (method, offset of its subobject in the most derived class).
type OverriderSets = FastHashMap<(MethodId, i64), Vec<(MethodId, usize)>>;

/// Final overriders of a most derived class, optionally embedded at some
/// offset inside a layout class (construction vtables).
pub struct FinalOverriders {
    most_derived: ClassId,
    overriders: FastHashMap<(MethodId, i64), OverriderInfo>,
}

impl FinalOverriders {
    pub fn new(
        graph: &ClassGraph,
        records: &RecordLayouts,
        most_derived: ClassId,
        most_derived_offset: i64,
        layout_class: ClassId,
    ) -> Self {
        let mut walker = SubobjectWalker {
            graph,
            records,
            most_derived,
            layout_class,
            nodes: Vec::new(),
            vbase_nodes: fast_hash_map_new(),
        };
        let root = walker.add(most_derived, 0, most_derived_offset);
        let nodes = walker.nodes;

        let mut memo: Vec<Option<OverriderSets>> = (0..nodes.len()).map(|_| None).collect();
        let sets = collect_overriders(graph, &nodes, root, &mut memo);

        let mut overriders = fast_hash_map_new();
        for (key, candidates) in sets {
            if candidates.len() > 1 {
                warn!(
                    class = %graph.class_name(most_derived),
                    method = %graph.method_name(key.0),
                    candidates = candidates.len(),
                    "no unique final overrider; using the first candidate"
                );
            }
            let (method, node) = candidates[0];
            overriders.insert(
                key,
                OverriderInfo {
                    method,
                    offset: nodes[node].layout_offset,
                },
            );
        }
        Self {
            most_derived,
            overriders,
        }
    }

    pub fn most_derived(&self) -> ClassId {
        self.most_derived
    }

    /// Final overrider of `method` in the base subobject at `base_offset`.
    pub fn get(&self, method: MethodId, base_offset: i64) -> OverriderInfo {
        match self.overriders.get(&(method, base_offset)) {
            Some(info) => *info,
            None => panic!(
                "Did not find overrider for method #{} at offset {}",
                method.index(),
                base_offset
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.overriders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overriders.is_empty()
    }
}

struct SubobjectWalker<'a> {
    graph: &'a ClassGraph,
    records: &'a RecordLayouts,
    most_derived: ClassId,
    layout_class: ClassId,
    nodes: Vec<Subobject>,
    /// Virtual bases are shared, so each gets one node
    vbase_nodes: FastHashMap<ClassId, usize>,
}

impl SubobjectWalker<'_> {
    fn add(&mut self, class: ClassId, offset: i64, layout_offset: i64) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Subobject {
            class,
            offset,
            layout_offset,
            bases: Vec::new(),
        });

        let layout = self.records.get(class);
        let mut bases = Vec::new();
        for spec in &self.graph.class(class).bases {
            let node = if spec.is_virtual {
                match self.vbase_nodes.get(&spec.class) {
                    Some(node) => *node,
                    None => {
                        let offset = self.records.get(self.most_derived).vbase_offset(spec.class);
                        let layout_offset = self.records.get(self.layout_class).vbase_offset(spec.class);
                        let node = self.add(spec.class, offset, layout_offset);
                        self.vbase_nodes.insert(spec.class, node);
                        node
                    }
                }
            } else {
                let rel = layout.base_offset(spec.class);
                self.add(spec.class, offset + rel, layout_offset + rel)
            };
            bases.push(node);
        }
        self.nodes[id].bases = bases;
        id
    }
}

fn collect_overriders(
    graph: &ClassGraph,
    nodes: &[Subobject],
    node: usize,
    memo: &mut Vec<Option<OverriderSets>>,
) -> OverriderSets {
    if let Some(done) = &memo[node] {
        return done.clone();
    }

    let mut sets: OverriderSets = fast_hash_map_new();
    for base in nodes[node].bases.clone() {
        for (key, candidates) in collect_overriders(graph, nodes, base, memo) {
            let merged = sets.entry(key).or_default();
            for candidate in candidates {
                if !merged.contains(&candidate) {
                    merged.push(candidate);
                }
            }
        }
    }

    let class = nodes[node].class;
    for method in graph.virtual_methods(class) {
        for candidates in sets.values_mut() {
            let mut replaced = false;
            candidates.retain(|(existing, _)| {
                let overridden = graph.overrides(method, *existing);
                replaced |= overridden;
                !overridden
            });
            if replaced && !candidates.contains(&(method, node)) {
                candidates.push((method, node));
            }
        }
        sets.insert((method, nodes[node].offset), vec![(method, node)]);
    }

    // An overrider hidden by another candidate along a different path loses.
    for candidates in sets.values_mut() {
        if candidates.len() > 1 {
            let snapshot = candidates.clone();
            candidates.retain(|(m, _)| !snapshot.iter().any(|(other, _)| graph.overrides(*other, *m)));
        }
    }

    memo[node] = Some(sets.clone());
    sets
}
