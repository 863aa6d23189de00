//! Capacity report builder
//!
//! Breakdowns are keyed by the pod condition `(type, status, reason)` and
//! kept in insertion order; containers and their states are kept in sorted
//! maps so the built report needs no further sorting.

use std::collections::{BTreeMap, HashMap};

use super::{ContainerObservation, PodObservation};
use crate::models::{
    ClusterCapacityReport, ClusterCapacityReportBreakdown, ContainerBreakdown,
    ContainerBreakdownExample, ContainerStateBreakdown, ReportOwner,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConditionKey {
    type_: String,
    status: String,
    reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StateKey {
    type_: String,
    reason: String,
}

#[derive(Debug)]
struct StateBucket {
    count: u32,
    example_pod: String,
}

#[derive(Debug, Default)]
struct ContainerBuilder {
    count: u32,
    states: BTreeMap<StateKey, StateBucket>,
}

impl ContainerBuilder {
    fn add(&mut self, pod: &str, container: &ContainerObservation) {
        self.count += 1;
        let key = StateKey {
            type_: container.state.as_str().to_string(),
            reason: container.reason.clone(),
        };
        self.states
            .entry(key)
            .or_insert_with(|| StateBucket {
                count: 0,
                example_pod: pod.to_string(),
            })
            .count += 1;
    }

    fn build(self, name: String) -> ContainerBreakdown {
        ContainerBreakdown {
            name,
            count: self.count,
            states: self
                .states
                .into_iter()
                .map(|(key, bucket)| ContainerStateBreakdown {
                    type_: key.type_,
                    reason: key.reason,
                    count: bucket.count,
                    example: ContainerBreakdownExample {
                        pod: bucket.example_pod,
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
struct ConditionBuilder {
    key: ConditionKey,
    count: u32,
    containers: BTreeMap<String, ContainerBuilder>,
}

impl ConditionBuilder {
    fn build(self) -> ClusterCapacityReportBreakdown {
        ClusterCapacityReportBreakdown {
            type_: self.key.type_,
            status: self.key.status,
            reason: self.key.reason,
            count: self.count,
            containers: self
                .containers
                .into_iter()
                .map(|(name, container)| container.build(name))
                .collect(),
        }
    }
}

/// Folds pods into a [`ClusterCapacityReport`]
///
/// The example pod of a container state is the first pod added with that
/// state, so callers feed pods in a stable order.
#[derive(Debug)]
pub struct ReportBuilder {
    owner: String,
    breakdowns: Vec<ConditionBuilder>,
    index: HashMap<ConditionKey, usize>,
}

impl ReportBuilder {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            breakdowns: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Count `pod` once under each of its conditions
    pub fn add_pod(&mut self, pod: &PodObservation) -> &mut Self {
        for condition in &pod.conditions {
            let key = ConditionKey {
                type_: condition.type_.clone(),
                status: condition.status.clone(),
                reason: condition.reason.clone(),
            };
            let slot = match self.index.get(&key) {
                Some(slot) => *slot,
                None => {
                    self.breakdowns.push(ConditionBuilder {
                        key: key.clone(),
                        count: 0,
                        containers: BTreeMap::new(),
                    });
                    self.index.insert(key, self.breakdowns.len() - 1);
                    self.breakdowns.len() - 1
                }
            };

            let breakdown = &mut self.breakdowns[slot];
            breakdown.count += 1;
            for container in &pod.containers {
                breakdown
                    .containers
                    .entry(container.name.clone())
                    .or_default()
                    .add(&pod.name, container);
            }
        }
        self
    }

    pub fn build(self) -> ClusterCapacityReport {
        ClusterCapacityReport {
            owner: ReportOwner { name: self.owner },
            breakdown: self.breakdowns.into_iter().map(ConditionBuilder::build).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{ContainerState, PodCondition};

    fn pod(name: &str, ready: &str, containers: &[(&str, ContainerState, &str)]) -> PodObservation {
        PodObservation {
            name: name.to_string(),
            conditions: vec![PodCondition {
                type_: "Ready".into(),
                status: ready.into(),
                reason: String::new(),
            }],
            containers: containers
                .iter()
                .map(|(n, s, r)| ContainerObservation {
                    name: n.to_string(),
                    state: *s,
                    reason: r.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_same_state_aggregates() {
        let mut builder = ReportBuilder::new("reviews-api");
        builder
            .add_pod(&pod("pod-a", "True", &[("app", ContainerState::Running, "")]))
            .add_pod(&pod("pod-b", "True", &[("app", ContainerState::Running, "")]));
        let report = builder.build();

        assert_eq!(report.owner.name, "reviews-api");
        assert_eq!(report.breakdown.len(), 1);
        let node = &report.breakdown[0];
        assert_eq!(node.count, 2);
        assert_eq!(node.containers.len(), 1);
        assert_eq!(node.containers[0].count, 2);
        assert_eq!(node.containers[0].states[0].count, 2);
        assert_eq!(node.containers[0].states[0].example.pod, "pod-a");
    }

    #[test]
    fn test_breakdowns_in_insertion_order() {
        let mut builder = ReportBuilder::new("r");
        builder
            .add_pod(&pod("a", "True", &[]))
            .add_pod(&pod("b", "False", &[]))
            .add_pod(&pod("c", "True", &[]));
        let report = builder.build();
        let statuses: Vec<_> = report.breakdown.iter().map(|b| b.status.as_str()).collect();
        assert_eq!(statuses, vec!["True", "False"]);
        assert_eq!(report.breakdown[0].count, 2);
    }

    #[test]
    fn test_containers_and_states_sorted() {
        let mut builder = ReportBuilder::new("r");
        builder.add_pod(&pod(
            "a",
            "False",
            &[
                ("zeta", ContainerState::Waiting, "ImagePullBackOff"),
                ("alpha", ContainerState::Terminated, "OOMKilled"),
            ],
        ));
        builder.add_pod(&pod(
            "b",
            "False",
            &[
                ("zeta", ContainerState::Running, ""),
                ("alpha", ContainerState::Terminated, "Completed"),
            ],
        ));
        let report = builder.build();
        let node = &report.breakdown[0];
        let names: Vec<_> = node.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let alpha: Vec<_> = node.containers[0]
            .states
            .iter()
            .map(|s| (s.type_.as_str(), s.reason.as_str()))
            .collect();
        assert_eq!(alpha, vec![("Terminated", "Completed"), ("Terminated", "OOMKilled")]);

        let zeta: Vec<_> = node.containers[1].states.iter().map(|s| s.type_.as_str()).collect();
        assert_eq!(zeta, vec!["Running", "Waiting"]);
    }

    #[test]
    fn test_separator_in_values_does_not_collide() {
        let mut builder = ReportBuilder::new("r");
        let mut first = pod("a", "True", &[]);
        first.conditions[0].type_ = "Read".into();
        first.conditions[0].status = "yTrue".into();
        builder.add_pod(&first);
        builder.add_pod(&pod("b", "True", &[]));
        assert_eq!(builder.build().breakdown.len(), 2);
    }
}
