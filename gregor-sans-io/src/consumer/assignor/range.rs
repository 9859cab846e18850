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

/// Contiguous partition ranges per topic.
///
/// The partitions of each topic are divided among that topic's subscribers
/// in member id order; the first `partitions % subscribers` members each
/// take one extra.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RangeAssignor;

impl RangeAssignor {
    pub(crate) const NAME: &'static str = "range";
}

pub(crate) fn assign(
    partitions: &BTreeMap<String, Vec<i32>>,
    members: &[GroupMember],
) -> Result<BTreeMap<String, MemberAssignment>> {
    let mut plan = BTreeMap::<String, BTreeMap<String, Vec<i32>>>::new();

    for (topic, indexes) in partitions {
        let subscribed = subscribers(members, topic);

        if subscribed.is_empty() {
            continue;
        }

        let allocation = indexes.len() / subscribed.len();
        let remainder = indexes.len() % subscribed.len();

        let mut next = indexes.iter().copied();

        for (nth, member_id) in subscribed.into_iter().enumerate() {
            let width = allocation + usize::from(nth < remainder);
            let range: Vec<_> = next.by_ref().take(width).collect();

            if range.is_empty() {
                continue;
            }

            _ = plan
                .entry(member_id.into())
                .or_default()
                .insert(topic.clone(), range);
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
    fn evenly_divided() -> Result<(), Error> {
        let partitions = BTreeMap::from([
            ("t0".into(), vec![0, 1, 2, 3]),
            ("t1".into(), vec![0, 1, 2, 3]),
        ]);

        let members = [member("m0", &["t0", "t1"]), member("m1", &["t0", "t1"])];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(
            vec![("t0", &[0, 1][..]), ("t1", &[0, 1][..])],
            assigned(&assignments["m0"])
        );
        assert_eq!(
            vec![("t0", &[2, 3][..]), ("t1", &[2, 3][..])],
            assigned(&assignments["m1"])
        );

        Ok(())
    }

    #[test]
    fn remainder_to_first_members() -> Result<(), Error> {
        let partitions = BTreeMap::from([("t0".into(), vec![0, 1, 2])]);
        let members = [member("m0", &["t0"]), member("m1", &["t0"])];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(vec![("t0", &[0, 1][..])], assigned(&assignments["m0"]));
        assert_eq!(vec![("t0", &[2][..])], assigned(&assignments["m1"]));

        Ok(())
    }

    #[test]
    fn more_members_than_partitions() -> Result<(), Error> {
        let partitions = BTreeMap::from([("t0".into(), vec![0])]);
        let members = [
            member("m0", &["t0"]),
            member("m1", &["t0"]),
            member("m2", &["t0"]),
        ];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(vec![("t0", &[0][..])], assigned(&assignments["m0"]));
        assert!(assignments["m1"].assigned_partitions.is_empty());
        assert!(assignments["m2"].assigned_partitions.is_empty());

        Ok(())
    }

    #[test]
    fn differing_subscriptions() -> Result<(), Error> {
        let partitions = BTreeMap::from([
            ("t0".into(), vec![0, 1]),
            ("t1".into(), vec![0, 1]),
        ]);

        let members = [member("m0", &["t0"]), member("m1", &["t0", "t1"])];

        let assignments = assign(&partitions, &members)?;

        assert_eq!(vec![("t0", &[0][..])], assigned(&assignments["m0"]));
        assert_eq!(
            vec![("t0", &[1][..]), ("t1", &[0, 1][..])],
            assigned(&assignments["m1"])
        );

        Ok(())
    }
}
