//! # DON Classifier
//!
//! Splits a registry snapshot into the DON sets the launcher acts on,
//! relative to the local node:
//!
//! | Set | Membership | Visibility |
//! |-----|------------|------------|
//! | `my_workflow_dons` | member | any |
//! | `remote_workflow_dons` | non-member | any |
//! | `my_capability_dons` | member | public |
//! | `remote_capability_dons` | non-member | public |
//!
//! Workflow DONs are taken from every DON, public or not: a private
//! workflow DON still counts toward the single-workflow-DON invariant and
//! may still call capabilities this node exposes. The node's families are
//! the union over every DON it belongs to, whatever its role.

use super::errors::LauncherError;
use capability_types::{Don, PeerId, RegistrySnapshot};
use std::collections::BTreeSet;

/// All DONs with at least one member, ascending by ID.
pub fn all_dons(snapshot: &RegistrySnapshot) -> Vec<&Don> {
    let mut dons: Vec<&Don> = snapshot
        .ids_to_dons
        .values()
        .filter(|d| !d.info.members.is_empty())
        .collect();
    dons.sort_by_key(|d| d.id());
    dons
}

/// Public subset, order preserved.
pub fn public_dons<'a>(dons: &[&'a Don]) -> Vec<&'a Don> {
    dons.iter().copied().filter(|d| d.info.is_public).collect()
}

/// Whether two family sets share a tag. Two empty sets overlap.
pub fn families_overlap(a: &[String], b: &[String]) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    a.iter().any(|family| b.contains(family))
}

/// Keep the DONs whose families overlap `families`.
pub fn filter_dons_by_families<'a>(dons: Vec<&'a Don>, families: &[String]) -> Vec<&'a Don> {
    dons.into_iter()
        .filter(|d| families_overlap(&d.info.families, families))
        .collect()
}

/// The DON sets derived from one snapshot.
#[derive(Debug, Clone, Default)]
pub struct DonClassification<'a> {
    /// Non-empty DONs, ascending by ID. Input to the topology planner.
    pub all_dons: Vec<&'a Don>,
    pub my_workflow_dons: Vec<&'a Don>,
    pub remote_workflow_dons: Vec<&'a Don>,
    pub my_capability_dons: Vec<&'a Don>,
    pub remote_capability_dons: Vec<&'a Don>,
    /// Union of the families of every DON the node belongs to.
    pub my_families: Vec<String>,
}

impl<'a> DonClassification<'a> {
    /// Classify `snapshot` relative to `me`.
    ///
    /// When the node's own DONs carry families, the remote sets are narrowed
    /// to DONs sharing at least one of them. Fails if the node is a member
    /// of more than one workflow DON.
    pub fn classify(snapshot: &'a RegistrySnapshot, me: &PeerId) -> Result<Self, LauncherError> {
        let all = all_dons(snapshot);
        let public = public_dons(&all);

        let mut families = BTreeSet::new();
        let mut my_workflow_dons = Vec::new();
        let mut remote_workflow_dons = Vec::new();
        let mut my_capability_dons = Vec::new();
        let mut remote_capability_dons = Vec::new();

        for don in &all {
            let member = don.info.contains(me);
            if member {
                families.extend(don.info.families.iter().cloned());
            }
            if don.info.accepts_workflows {
                if member {
                    my_workflow_dons.push(*don);
                } else {
                    remote_workflow_dons.push(*don);
                }
            }
        }

        for don in &public {
            if don.exposes_capabilities() {
                if don.info.contains(me) {
                    my_capability_dons.push(*don);
                } else {
                    remote_capability_dons.push(*don);
                }
            }
        }

        let my_families: Vec<String> = families.into_iter().collect();
        if !my_families.is_empty() {
            remote_workflow_dons = filter_dons_by_families(remote_workflow_dons, &my_families);
            remote_capability_dons = filter_dons_by_families(remote_capability_dons, &my_families);
        }

        if my_workflow_dons.len() > 1 {
            return Err(LauncherError::MultipleWorkflowDons(
                my_workflow_dons.iter().map(|d| d.id()).collect(),
            ));
        }

        Ok(Self {
            all_dons: all,
            my_workflow_dons,
            remote_workflow_dons,
            my_capability_dons,
            remote_capability_dons,
            my_families,
        })
    }

    pub fn belongs_to_workflow_don(&self) -> bool {
        !self.my_workflow_dons.is_empty()
    }

    pub fn belongs_to_capability_don(&self) -> bool {
        !self.my_capability_dons.is_empty()
    }

    /// The single workflow DON the node belongs to, if any.
    pub fn my_workflow_don(&self) -> Option<&'a Don> {
        self.my_workflow_dons.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capability_types::DonInfo;

    fn peer(b: u8) -> PeerId {
        PeerId::new([b; 32])
    }

    fn workflow_don(id: u32, members: &[u8]) -> Don {
        let mut info = DonInfo::new(id, 1, members.iter().copied().map(peer).collect());
        info.accepts_workflows = true;
        Don::new(info)
    }

    fn capability_don(id: u32, members: &[u8]) -> Don {
        let info = DonInfo::new(id, 1, members.iter().copied().map(peer).collect());
        Don::new(info).with_capability("cap@1.0.0", Vec::new())
    }

    #[test]
    fn test_all_dons_sorted_and_skips_empty() {
        let snapshot = RegistrySnapshot::new()
            .with_don(capability_don(7, &[1]))
            .with_don(workflow_don(3, &[2]))
            .with_don(Don::new(DonInfo::new(5, 0, vec![])));
        let ids: Vec<u32> = all_dons(&snapshot).iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn test_classify_workflow_member() {
        let snapshot = RegistrySnapshot::new()
            .with_don(workflow_don(1, &[1, 2, 3, 4]))
            .with_don(capability_don(2, &[5, 6, 7, 8]));
        let c = DonClassification::classify(&snapshot, &peer(1)).unwrap();
        assert_eq!(c.my_workflow_don().map(|d| d.id()), Some(1));
        assert!(!c.belongs_to_capability_don());
        assert_eq!(c.remote_capability_dons.len(), 1);
        assert!(c.remote_workflow_dons.is_empty());
    }

    #[test]
    fn test_classify_capability_member() {
        let snapshot = RegistrySnapshot::new()
            .with_don(workflow_don(1, &[1, 2, 3, 4]))
            .with_don(capability_don(2, &[5, 6, 7, 8]));
        let c = DonClassification::classify(&snapshot, &peer(5)).unwrap();
        assert!(!c.belongs_to_workflow_don());
        assert_eq!(c.my_capability_dons.len(), 1);
        assert_eq!(c.remote_workflow_dons.len(), 1);
    }

    #[test]
    fn test_private_don_never_remote() {
        let mut private = capability_don(2, &[5, 6, 7, 8]);
        private.info.is_public = false;
        let snapshot = RegistrySnapshot::new()
            .with_don(workflow_don(1, &[1, 2, 3, 4]))
            .with_don(private);
        let c = DonClassification::classify(&snapshot, &peer(1)).unwrap();
        assert!(c.remote_capability_dons.is_empty());
        assert_eq!(c.all_dons.len(), 2);
    }

    #[test]
    fn test_private_workflow_don_still_counts_as_mine() {
        let mut private = workflow_don(1, &[1, 2, 3, 4]);
        private.info.is_public = false;
        let snapshot = RegistrySnapshot::new().with_don(private);
        let c = DonClassification::classify(&snapshot, &peer(1)).unwrap();
        assert!(c.belongs_to_workflow_don());
    }

    #[test]
    fn test_private_workflow_don_is_remote_for_capability_node() {
        let mut private = workflow_don(1, &[1, 2, 3, 4]);
        private.info.is_public = false;
        let snapshot = RegistrySnapshot::new()
            .with_don(private)
            .with_don(capability_don(2, &[5, 6, 7, 8]));
        let c = DonClassification::classify(&snapshot, &peer(5)).unwrap();
        let ids: Vec<u32> = c.remote_workflow_dons.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(c.my_capability_dons.len(), 1);
    }

    #[test]
    fn test_multiple_workflow_dons_is_fatal() {
        let snapshot = RegistrySnapshot::new()
            .with_don(workflow_don(1, &[1, 2]))
            .with_don(workflow_don(4, &[1, 3]));
        let err = DonClassification::classify(&snapshot, &peer(1)).unwrap_err();
        assert!(matches!(err, LauncherError::MultipleWorkflowDons(ref ids) if ids == &[1, 4]));
    }

    #[test]
    fn test_families_overlap() {
        let a = vec!["zone-a".to_string()];
        let b = vec!["zone-b".to_string()];
        assert!(families_overlap(&[], &[]));
        assert!(families_overlap(&a, &a));
        assert!(!families_overlap(&a, &b));
        assert!(!families_overlap(&a, &[]));
    }

    #[test]
    fn test_family_filtering_narrows_remote_sets() {
        let mut wf = workflow_don(1, &[1, 2, 3, 4]);
        wf.info.families = vec!["zone-a".into()];
        let mut same = capability_don(2, &[5, 6, 7, 8]);
        same.info.families = vec!["zone-a".into(), "zone-b".into()];
        let mut other = capability_don(3, &[9, 10, 11, 12]);
        other.info.families = vec!["zone-b".into()];
        let untagged = capability_don(4, &[13, 14, 15, 16]);

        let snapshot = RegistrySnapshot::new()
            .with_don(wf)
            .with_don(same)
            .with_don(other)
            .with_don(untagged);
        let c = DonClassification::classify(&snapshot, &peer(1)).unwrap();
        let ids: Vec<u32> = c.remote_capability_dons.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(c.my_families, vec!["zone-a".to_string()]);
    }

    #[test]
    fn test_families_of_private_don_enable_filtering() {
        let mut zone_a = Don::new(DonInfo::new(9, 0, vec![peer(1)]));
        zone_a.info.is_public = false;
        zone_a.info.families = vec!["zone-a".into()];
        let mut zone_b = capability_don(2, &[5, 6, 7, 8]);
        zone_b.info.families = vec!["zone-b".into()];

        let snapshot = RegistrySnapshot::new()
            .with_don(workflow_don(1, &[1, 2, 3, 4]))
            .with_don(zone_a)
            .with_don(zone_b);
        let c = DonClassification::classify(&snapshot, &peer(1)).unwrap();
        assert_eq!(c.my_families, vec!["zone-a".to_string()]);
        assert!(c.remote_capability_dons.is_empty());
    }

    #[test]
    fn test_no_families_keeps_everything() {
        let mut tagged = capability_don(2, &[5, 6, 7, 8]);
        tagged.info.families = vec!["zone-b".into()];
        let snapshot = RegistrySnapshot::new()
            .with_don(workflow_don(1, &[1, 2, 3, 4]))
            .with_don(tagged);
        let c = DonClassification::classify(&snapshot, &peer(1)).unwrap();
        assert_eq!(c.remote_capability_dons.len(), 1);
    }
}
