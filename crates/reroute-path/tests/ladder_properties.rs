//! Relaxation ladder properties
//!
//! Tenet: every rung is no stricter than the one before it, and the causal
//! link set survives every rung unchanged.

use proptest::prelude::*;
use reroute_model::{EndpointPair, LinkId, NodeId, RelaxationRung, ServiceRequirements, SrlgId};
use reroute_path::{ConstraintBuilder, PlanRequest, PlannerConfig};
use std::collections::BTreeSet;

fn ids(prefix: &'static str, max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    proptest::collection::btree_set((0..20_u32).prop_map(move |n| format!("{prefix}{n}")), 0..max)
}

proptest! {
    #[test]
    fn prop_ladder_only_loosens(
        links in ids("L", 4),
        nodes in ids("N", 4),
        srlgs in ids("G", 3),
        max_delay in proptest::option::of(1.0_f64..100.0),
        min_bw in proptest::option::of(1.0_f64..100.0),
        hops in 1_usize..20,
        increase in 1_usize..10,
    ) {
        let config = PlannerConfig {
            default_max_hops: hops,
            hop_increase: increase,
            ..PlannerConfig::default()
        };
        let causal: BTreeSet<LinkId> = links.into_iter().map(LinkId::from).collect();
        let request = PlanRequest::new(EndpointPair::new("head", "tail"), causal.clone())
            .with_avoid_nodes(nodes.into_iter().map(NodeId::from).collect())
            .with_requirements(ServiceRequirements {
                max_delay_ms: max_delay,
                min_bandwidth_gbps: min_bw,
            });
        let builder = ConstraintBuilder::new(&config);
        let initial = builder.initial(&request, srlgs.into_iter().map(SrlgId::from).collect());
        let ladder = builder.ladder(initial);

        let rungs: Vec<_> = ladder.iter().skip(1).map(|(r, _)| *r).collect();
        prop_assert_eq!(rungs, RelaxationRung::LADDER.to_vec());

        for pair in ladder.windows(2) {
            let (_, before) = &pair[0];
            let (_, after) = &pair[1];
            prop_assert_eq!(&after.avoid_links, &causal);
            prop_assert!(after.avoid_srlgs.is_subset(&before.avoid_srlgs));
            prop_assert!(after.avoid_nodes.is_subset(&before.avoid_nodes));
            prop_assert!(after.max_hops >= before.max_hops);
            prop_assert!(after.max_delay_ms.is_none() || after.max_delay_ms == before.max_delay_ms);
            prop_assert_eq!(after.min_bandwidth_gbps, before.min_bandwidth_gbps);
        }
    }
}
