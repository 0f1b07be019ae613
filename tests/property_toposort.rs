mod common;

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use common::named_group;

// Random layered DAGs: group N may only depend on groups 0..N-1, which
// keeps generation acyclic by construction.
fn dag_shape_strategy(max_groups: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_groups).prop_flat_map(|count| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..count),
            count,
        )
    })
}

proptest! {
    #[test]
    fn enumeration_is_a_topological_extension(raw_deps in dag_shape_strategy(10)) {
        let count = raw_deps.len();
        let groups: Vec<_> = (0..count)
            .map(|i| named_group(&format!("task_{i}")))
            .collect();

        let mut deps_of: HashMap<usize, HashSet<usize>> = HashMap::new();
        for (i, potential) in raw_deps.iter().enumerate() {
            let valid: HashSet<usize> = potential
                .iter()
                .filter(|_| i > 0)
                .map(|raw| raw % i)
                .collect();
            for &dep in &valid {
                groups[i].add_dependency_task_group(&groups[dep]).unwrap();
            }
            deps_of.insert(i, valid);
        }

        // A synthetic root depending on every group makes the whole shape
        // reachable from one enumeration.
        let root = named_group("root");
        for group in &groups {
            root.add_dependency_task_group(group).unwrap();
        }

        root.prepare_for_enumeration();
        let mut emitted: Vec<String> = Vec::new();
        while let Some(entry) = root.get_next() {
            emitted.push(entry.key());
            root.report_completion(&entry).unwrap();
        }

        // Complete, duplicate-free coverage.
        prop_assert_eq!(emitted.len(), count + 1);
        let unique: HashSet<&String> = emitted.iter().collect();
        prop_assert_eq!(unique.len(), emitted.len());
        prop_assert_eq!(emitted.last().map(String::as_str), Some("root"));

        // Every dependency precedes its dependent.
        let index_of: HashMap<&str, usize> = emitted
            .iter()
            .enumerate()
            .map(|(index, key)| (key.as_str(), index))
            .collect();
        for (i, deps) in &deps_of {
            let dependent = format!("task_{i}");
            for dep in deps {
                let dependency = format!("task_{dep}");
                prop_assert!(
                    index_of[dependency.as_str()] < index_of[dependent.as_str()],
                    "{} must precede {}",
                    dependency,
                    dependent
                );
            }
        }
    }
}
