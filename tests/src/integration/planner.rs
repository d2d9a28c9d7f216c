//! # Planner Properties
//!
//! Classifier and both planners run together over generated registries,
//! the way one reconciliation pass uses them.

#[cfg(test)]
mod tests {
    use crate::benchmarks::GeneratedNetwork;
    use capability_launcher::domain::{all_dons, DonClassification};
    use capability_launcher::{don_pairs_to_update, peers};
    use capability_types::{PeerId, RegistrySnapshot, StreamConfig};
    use proptest::prelude::*;

    struct Plan {
        peer_count: usize,
        pairs: Vec<(u32, u32)>,
    }

    fn plan(snapshot: &RegistrySnapshot, me: &PeerId, bootstrap: bool) -> Plan {
        let dons = DonClassification::classify(snapshot, me).unwrap();
        let peer_set = peers(
            &dons.all_dons,
            dons.belongs_to_capability_don(),
            dons.belongs_to_workflow_don(),
            bootstrap,
            StreamConfig::default(),
        );
        let pairs = don_pairs_to_update(&all_dons(snapshot), me, bootstrap)
            .iter()
            .map(|p| p.ids())
            .collect();
        Plan {
            peer_count: peer_set.len(),
            pairs,
        }
    }

    fn network() -> impl Strategy<Value = GeneratedNetwork> {
        (1u32..5, 1u32..5, 1u32..8).prop_map(|(w, c, m)| GeneratedNetwork::new(w, c, m))
    }

    proptest! {
        #[test]
        fn prop_workflow_node_reaches_every_capability_don(net in network()) {
            let snapshot = net.snapshot();
            let me = net.workflow_node();
            let dons = DonClassification::classify(&snapshot, &me).unwrap();
            prop_assert_eq!(dons.my_workflow_don().map(|d| d.id()), Some(1));
            prop_assert_eq!(dons.remote_capability_dons.len() as u32, net.capability_dons);

            let plan = plan(&snapshot, &me, false);
            prop_assert_eq!(plan.peer_count as u32, net.capability_dons * net.members_per_don);
            let expected: Vec<(u32, u32)> = (0..net.capability_dons)
                .map(|c| (1, net.workflow_dons + c + 1))
                .collect();
            prop_assert_eq!(plan.pairs, expected);
        }

        #[test]
        fn prop_capability_node_reaches_every_workflow_don(net in network()) {
            let snapshot = net.snapshot();
            let plan = plan(&snapshot, &net.capability_node(), false);
            prop_assert_eq!(plan.peer_count as u32, net.workflow_dons * net.members_per_don);
            prop_assert_eq!(plan.pairs.len() as u32, net.workflow_dons);
            let my_don = net.workflow_dons + 1;
            prop_assert!(plan.pairs.iter().all(|(_, b)| *b == my_don));
        }

        #[test]
        fn prop_bootstrap_connects_everything(net in network()) {
            let snapshot = net.snapshot();
            let plan = plan(&snapshot, &net.outsider(), true);
            prop_assert_eq!(
                plan.peer_count as u32,
                (net.workflow_dons + net.capability_dons) * net.members_per_don
            );
            prop_assert_eq!(plan.pairs.len() as u32, net.workflow_dons * net.capability_dons);
        }

        #[test]
        fn prop_outsider_connects_nothing(net in network()) {
            let snapshot = net.snapshot();
            let plan = plan(&snapshot, &net.outsider(), false);
            prop_assert_eq!(plan.peer_count, 0);
            prop_assert!(plan.pairs.is_empty());
        }

        #[test]
        fn prop_pairs_are_ordered_and_unique(net in network(), bootstrap in any::<bool>()) {
            let snapshot = net.snapshot();
            let plan = plan(&snapshot, &net.workflow_node(), bootstrap);
            let mut seen = std::collections::BTreeSet::new();
            for (a, b) in &plan.pairs {
                prop_assert!(a < b);
                prop_assert!(seen.insert((*a, *b)));
            }
        }
    }
}
