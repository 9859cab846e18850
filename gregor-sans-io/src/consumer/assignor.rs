// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Partition assignment strategies.
//!
//! The group leader runs the strategy named in its join protocol over the
//! cluster's partitions and every member's subscription, producing one
//! assignment per member for the coordinator to distribute in sync.

use std::collections::BTreeMap;

use crate::{Error, Result, consumer::MemberAssignment, consumer::Subscription};

mod range;
mod round_robin;

pub use range::RangeAssignor;
pub use round_robin::RoundRobinAssignor;

/// One member of the group as seen by the leader: its id and decoded
/// subscription.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupMember {
    pub member_id: String,
    pub subscription: Subscription,
}

impl GroupMember {
    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn subscription(self, subscription: Subscription) -> Self {
        Self {
            subscription,
            ..self
        }
    }
}

/// An assignment strategy.
///
/// Given identical inputs a strategy must produce identical output: members
/// are considered in lexicographic member id order so that repeated
/// rebalances over an unchanged group converge rather than oscillate. Every
/// partition of every subscribed topic is assigned to exactly one of that
/// topic's subscribers, and every member receives an assignment, possibly
/// empty.
pub trait Assignor: std::fmt::Debug + Send {
    /// the name this strategy is known by on the wire
    fn name(&self) -> &'static str;

    fn assign(
        &self,
        partitions: &BTreeMap<String, Vec<i32>>,
        members: &[GroupMember],
    ) -> Result<BTreeMap<String, MemberAssignment>>;
}

impl Assignor for RangeAssignor {
    fn name(&self) -> &'static str {
        RangeAssignor::NAME
    }

    fn assign(
        &self,
        partitions: &BTreeMap<String, Vec<i32>>,
        members: &[GroupMember],
    ) -> Result<BTreeMap<String, MemberAssignment>> {
        range::assign(partitions, members)
    }
}

impl Assignor for RoundRobinAssignor {
    fn name(&self) -> &'static str {
        RoundRobinAssignor::NAME
    }

    fn assign(
        &self,
        partitions: &BTreeMap<String, Vec<i32>>,
        members: &[GroupMember],
    ) -> Result<BTreeMap<String, MemberAssignment>> {
        round_robin::assign(partitions, members)
    }
}

/// instantiate the strategy registered under a wire name
pub fn from_name(name: &str) -> Result<Box<dyn Assignor + Sync>> {
    match name {
        RangeAssignor::NAME => Ok(Box::new(RangeAssignor)),
        RoundRobinAssignor::NAME => Ok(Box::new(RoundRobinAssignor)),
        otherwise => Err(Error::UnknownAssignor(otherwise.into())),
    }
}

/// member ids in lexicographic order, subscribed to the given topic
fn subscribers<'a>(members: &'a [GroupMember], topic: &str) -> Vec<&'a str> {
    let mut subscribed = members
        .iter()
        .filter(|member| member.subscription.topics.iter().any(|t| t.as_str() == topic))
        .map(|member| member.member_id.as_str())
        .collect::<Vec<_>>();

    subscribed.sort_unstable();
    subscribed.dedup();
    subscribed
}

/// wrap per member topic partition plans into assignments, giving every
/// member an entry
fn plan_to_assignments(
    members: &[GroupMember],
    mut plan: BTreeMap<String, BTreeMap<String, Vec<i32>>>,
) -> BTreeMap<String, MemberAssignment> {
    members
        .iter()
        .map(|member| {
            let assigned = plan.remove(&member.member_id).unwrap_or_default();

            (
                member.member_id.clone(),
                MemberAssignment::default()
                    .version(crate::consumer::VERSION)
                    .assigned_partitions(assigned.into_iter().map(|(topic, partitions)| {
                        crate::consumer::TopicPartition { topic, partitions }
                    })),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(member_id: &str, topics: &[&str]) -> GroupMember {
        GroupMember::default().member_id(member_id).subscription(
            Subscription::default().topics(topics.iter().map(|topic| (*topic).to_owned())),
        )
    }

    #[test]
    fn unknown_strategy() {
        assert!(matches!(
            from_name("sticky"),
            Err(Error::UnknownAssignor(name)) if name == "sticky"
        ));
    }

    #[test]
    fn every_partition_assigned_exactly_once() -> Result<()> {
        let partitions = BTreeMap::from([
            ("t0".into(), vec![0, 1, 2, 3]),
            ("t1".into(), vec![0, 1, 2]),
        ]);

        let members = [
            member("m0", &["t0", "t1"]),
            member("m1", &["t0"]),
            member("m2", &["t0", "t1"]),
        ];

        for assignor in [from_name("range")?, from_name("roundrobin")?] {
            let assignments = assignor.assign(&partitions, &members)?;
            assert_eq!(members.len(), assignments.len(), "{}", assignor.name());

            let mut seen = BTreeMap::<String, Vec<i32>>::new();

            for assignment in assignments.values() {
                for topic in &assignment.assigned_partitions {
                    seen.entry(topic.topic.clone())
                        .or_default()
                        .extend(&topic.partitions);
                }
            }

            for (topic, indexes) in &mut seen {
                indexes.sort_unstable();
                assert_eq!(
                    &partitions[topic], indexes,
                    "{}: {topic}",
                    assignor.name()
                );
            }

            assert_eq!(partitions.len(), seen.len(), "{}", assignor.name());
        }

        Ok(())
    }

    #[test]
    fn deterministic_over_member_order() -> Result<()> {
        let partitions = BTreeMap::from([("t0".into(), vec![0, 1, 2, 3, 4])]);

        let forward = [member("m0", &["t0"]), member("m1", &["t0"])];
        let reverse = [member("m1", &["t0"]), member("m0", &["t0"])];

        for assignor in [from_name("range")?, from_name("roundrobin")?] {
            assert_eq!(
                assignor.assign(&partitions, &forward)?,
                assignor.assign(&partitions, &reverse)?,
                "{}",
                assignor.name()
            );
        }

        Ok(())
    }
}
