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

use std::collections::BTreeMap;

use crate::{
    Result,
    consumer::{
        MemberAssignment,
        assignor::{GroupMember, plan_to_assignments, subscribers},
    },
};

/// Partitions dealt one at a time over the member ring.
///
/// Topics and partitions are walked in order, handing each partition to the
/// next member in the ring that subscribes to its topic.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RoundRobinAssignor;

impl RoundRobinAssignor {
    pub(crate) const NAME: &'static str = "roundrobin";
}

pub(crate) fn assign(
    partitions: &BTreeMap<String, Vec<i32>>,
    members: &[GroupMember],
) -> Result<BTreeMap<String, MemberAssignment>> {
    let mut ring = members
        .iter()
        .map(|member| member.member_id.as_str())
        .collect::<Vec<_>>();
    ring.sort_unstable();
    ring.dedup();

    let mut plan = BTreeMap::<String, BTreeMap<String, Vec<i32>>>::new();
    let mut nth = 0;

    for (topic, indexes) in partitions {
        if subscribers(members, topic).is_empty() {
            continue;
        }

        for index in indexes {
            let member_id = loop {
                let candidate = ring[nth % ring.len()];
                nth += 1;

                if members.iter().any(|member| {
                    member.member_id == candidate
                        && member.subscription.topics.iter().any(|t| t == topic)
                }) {
                    break candidate;
                }
            };

            plan.entry(member_id.into())
                .or_default()
                .entry(topic.clone())
                .or_default()
                .push(*index);
        }
    }

    Ok(plan_to_assignments(members, plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, consumer::Subscription};

    fn member(member_id: &str, topics: &[&str]) -> GroupMember {
        GroupMember::default().member_id(member_id).subscription(
            Subscription::default().topics(topics.iter().map(|topic| (*topic).to_owned())),
        )
    }

    fn assigned(assignment: &MemberAssignment) -> Vec<(&str, &[i32])> {
        assignment
            .assigned_partitions
            .iter()
            .map(|topic| (topic.topic.as_str(), &topic.partitions[..]))
            .collect()
    }

    #[test]
    fn dealt_over_the_ring() -> Result<(), Error> {
        let partitions = BTreeMap::from([
            ("t0".into(), vec![0]),
            ("t1".into(), vec![0, 1]),
            ("t2".into(), vec![0, 1, 2, 3]),
        ]);

        let members = [member("m0", &["t0", "t1", "t2"]), member("m1", &["t0", "t1", "t2"])];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(
            vec![("t0", &[0][..]), ("t1", &[1][..]), ("t2", &[1, 3][..])],
            assigned(&assignments["m0"])
        );
        assert_eq!(
            vec![("t1", &[0][..]), ("t2", &[0, 2][..])],
            assigned(&assignments["m1"])
        );

        Ok(())
    }

    #[test]
    fn skips_unsubscribed_members() -> Result<(), Error> {
        let partitions = BTreeMap::from([("t0".into(), vec![0, 1]), ("t1".into(), vec![0])]);
        let members = [member("m0", &["t0"]), member("m1", &["t0", "t1"])];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(vec![("t0", &[0][..])], assigned(&assignments["m0"]));
        assert_eq!(
            vec![("t0", &[1][..]), ("t1", &[0][..])],
            assigned(&assignments["m1"])
        );

        Ok(())
    }

    #[test]
    fn topic_without_subscribers() -> Result<(), Error> {
        let partitions = BTreeMap::from([("t0".into(), vec![0]), ("t9".into(), vec![0, 1])]);
        let members = [member("m0", &["t0"])];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(vec![("t0", &[0][..])], assigned(&assignments["m0"]));

        Ok(())
    }
}
