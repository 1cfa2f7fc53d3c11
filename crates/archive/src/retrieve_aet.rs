//! Retrieve AE assignment and study-level aggregation rules.
//!
//! Both functions operate on the instances of one study in the order the store returned
//! them. They mutate nothing outside the slice they are given; persisting the outcome is
//! the caller's job.

use std::collections::BTreeSet;

use stgcmt_core::AeTitle;

use crate::commitment::StorageCommitmentReport;
use crate::exporter::ExporterDescriptor;
use crate::hierarchy::{Instance, InstanceKey};

/// Titles applied to one matched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub key: InstanceKey,
    pub titles: Vec<AeTitle>,
}

/// Report-level retrieve AE title if present, else the exporter's storage commitment SCP.
pub fn default_retrieve_aet<'a>(
    report: &'a StorageCommitmentReport,
    exporter: &'a ExporterDescriptor,
) -> &'a AeTitle {
    report
        .retrieve_ae_title
        .as_ref()
        .unwrap_or_else(|| exporter.stgcmt_scp_ae_title())
}

/// Add retrieve AE titles to every instance referenced by the report.
///
/// Instances without a referenced SOP item are left untouched. Returns one `Assignment`
/// per matched instance, in instance order.
pub fn assign_retrieve_aets(
    instances: &mut [Instance],
    report: &StorageCommitmentReport,
    exporter: &ExporterDescriptor,
) -> Vec<Assignment> {
    let default = default_retrieve_aet(report, exporter);
    let policy = exporter.retrieve_policy();

    let mut assignments = Vec::new();
    for inst in instances.iter_mut() {
        let Some(reference) = report.find_referenced(inst.sop_instance_uid()) else {
            continue;
        };

        let titles = policy.titles_for(reference, default);
        for ae in &titles {
            inst.add_external_retrieve_aet(ae.clone());
        }
        assignments.push(Assignment {
            key: inst.key().clone(),
            titles,
        });
    }
    assignments
}

/// The single retrieve AE title shared by all instances of a study, if there is one.
///
/// Walks instances in order and stops at the first one without any title; an empty
/// study never qualifies.
pub fn study_retrieve_aet(instances: &[Instance]) -> Option<AeTitle> {
    let mut all_with_aet = false;
    let mut union: BTreeSet<&AeTitle> = BTreeSet::new();

    for inst in instances {
        all_with_aet = !inst.external_retrieve_aets().is_empty();
        union.extend(inst.external_retrieve_aets().iter());
        if !all_with_aet {
            break;
        }
    }

    if all_with_aet && union.len() == 1 {
        union.into_iter().next().cloned()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::ReferencedSop;
    use proptest::prelude::*;
    use stgcmt_core::SopInstanceUid;

    fn ae(s: &str) -> AeTitle {
        s.parse().unwrap()
    }

    fn sop(n: usize) -> SopInstanceUid {
        format!("1.2.3.1.{n}").parse().unwrap()
    }

    fn instance(n: usize, aets: &[&str]) -> Instance {
        Instance::new("1.2.3.1".parse().unwrap(), sop(n))
            .with_external_retrieve_aets(aets.iter().map(|a| ae(a)))
    }

    fn exporter() -> ExporterDescriptor {
        ExporterDescriptor::new("STORESCP".parse().unwrap(), "dicom:STORESCP", ae("STGCMTSCP"))
    }

    fn report() -> StorageCommitmentReport {
        StorageCommitmentReport::new("2.25.7".parse().unwrap())
    }

    fn titles(inst: &Instance) -> Vec<&str> {
        inst.external_retrieve_aets().iter().map(AeTitle::as_str).collect()
    }

    #[test]
    fn default_falls_back_to_exporter_scp() {
        let exp = exporter();
        assert_eq!(default_retrieve_aet(&report(), &exp), &ae("STGCMTSCP"));

        let with_default = report().with_retrieve_ae(ae("MSGAE"));
        assert_eq!(default_retrieve_aet(&with_default, &exp), &ae("MSGAE"));
    }

    #[test]
    fn unmatched_instances_are_untouched() {
        let mut instances = vec![instance(1, &["OLD"]), instance(2, &[])];
        let rpt = report().with_referenced(ReferencedSop::new(sop(2)));

        let assignments = assign_retrieve_aets(&mut instances, &rpt, &exporter());

        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].key, *instances[1].key());
        assert_eq!(titles(&instances[0]), vec!["OLD"]);
        assert_eq!(titles(&instances[1]), vec!["STGCMTSCP"]);
    }

    #[test]
    fn configured_titles_take_precedence_over_overrides() {
        let mut instances = vec![instance(1, &[]), instance(2, &[])];
        let rpt = report()
            .with_retrieve_ae(ae("MSGAE"))
            .with_referenced(ReferencedSop::new(sop(1)).with_retrieve_ae(ae("OVERRIDE")))
            .with_referenced(ReferencedSop::new(sop(2)));
        let exp = exporter().with_retrieve_ae_titles(vec![ae("CFG1"), ae("CFG2")]);

        assign_retrieve_aets(&mut instances, &rpt, &exp);

        assert_eq!(titles(&instances[0]), vec!["CFG1", "CFG2"]);
        assert_eq!(titles(&instances[1]), vec!["CFG1", "CFG2"]);
    }

    #[test]
    fn assignment_keeps_existing_titles() {
        let mut instances = vec![instance(1, &["PRIOR"])];
        let rpt = report().with_referenced(ReferencedSop::new(sop(1)).with_retrieve_ae(ae("NEW")));

        assign_retrieve_aets(&mut instances, &rpt, &exporter());

        assert_eq!(titles(&instances[0]), vec!["NEW", "PRIOR"]);
    }

    #[test]
    fn study_aet_set_when_all_share_one_title() {
        let instances = vec![instance(1, &["AE1"]), instance(2, &["AE1"]), instance(3, &["AE1"])];
        assert_eq!(study_retrieve_aet(&instances), Some(ae("AE1")));
    }

    #[test]
    fn study_aet_unset_when_titles_differ() {
        let instances = vec![instance(1, &["AE1"]), instance(2, &["AE2"]), instance(3, &["AE1"])];
        assert_eq!(study_retrieve_aet(&instances), None);

        let multi = vec![instance(1, &["AE1", "AE2"]), instance(2, &["AE1", "AE2"])];
        assert_eq!(study_retrieve_aet(&multi), None);
    }

    #[test]
    fn study_aet_unset_when_any_instance_lacks_title() {
        let first_empty = vec![instance(1, &[]), instance(2, &["AE1"])];
        assert_eq!(study_retrieve_aet(&first_empty), None);

        let last_empty = vec![instance(1, &["AE1"]), instance(2, &[])];
        assert_eq!(study_retrieve_aet(&last_empty), None);
    }

    #[test]
    fn empty_study_never_qualifies() {
        assert_eq!(study_retrieve_aet(&[]), None);
    }

    fn full_scan(instances: &[Instance]) -> Option<AeTitle> {
        if instances.is_empty() || instances.iter().any(|i| i.external_retrieve_aets().is_empty()) {
            return None;
        }
        let union: BTreeSet<AeTitle> = instances
            .iter()
            .flat_map(|i| i.external_retrieve_aets().iter().cloned())
            .collect();
        if union.len() == 1 { union.into_iter().next() } else { None }
    }

    const POOL: [&str; 3] = ["AE1", "AE2", "AE3"];

    fn arb_instances() -> impl Strategy<Value = Vec<Instance>> {
        prop::collection::vec(prop::collection::vec(0usize..POOL.len(), 0..3), 0..8).prop_map(
            |sets| {
                sets.into_iter()
                    .enumerate()
                    .map(|(n, idx)| {
                        let names: Vec<&str> = idx.into_iter().map(|i| POOL[i]).collect();
                        instance(n + 1, &names)
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the early-exit walk agrees with an unconditional full scan.
        #[test]
        fn early_exit_walk_matches_full_scan(instances in arb_instances()) {
            prop_assert_eq!(study_retrieve_aet(&instances), full_scan(&instances));
        }

        /// Property: applying the same report twice yields the same title sets as once.
        #[test]
        fn assignment_is_idempotent(
            instances in arb_instances(),
            referenced in prop::collection::vec((1usize..10, prop::option::of(0usize..POOL.len())), 0..10),
            msg_default in prop::option::of(0usize..POOL.len()),
        ) {
            let mut rpt = report();
            if let Some(i) = msg_default {
                rpt = rpt.with_retrieve_ae(ae(POOL[i]));
            }
            for (n, override_idx) in referenced {
                let mut item = ReferencedSop::new(sop(n));
                if let Some(i) = override_idx {
                    item = item.with_retrieve_ae(ae(POOL[i]));
                }
                rpt = rpt.with_referenced(item);
            }
            let exp = exporter();

            let mut once = instances.clone();
            assign_retrieve_aets(&mut once, &rpt, &exp);
            let mut twice = once.clone();
            assign_retrieve_aets(&mut twice, &rpt, &exp);

            prop_assert_eq!(once, twice);
        }
    }
}
