//! Replica selection for reads and writes.

use std::sync::atomic::{AtomicUsize, Ordering};

use kestrel_common::{Endpoint, KestrelError, KestrelResult};

use crate::metadata::{PartitionHandler, ReadStrategy, TableHandler};

// Process-wide ticket for spreading reads over replicas. Wrapping is
// harmless, only the modulo matters.
static READ_TICKET: AtomicUsize = AtomicUsize::new(0);

fn pick<'a>(endpoints: &[&'a Endpoint]) -> Option<&'a Endpoint> {
    if endpoints.is_empty() {
        return None;
    }
    let ticket = READ_TICKET.fetch_add(1, Ordering::Relaxed);
    Some(endpoints[ticket % endpoints.len()])
}

/// Endpoint to read from under the given strategy, or `None` when the
/// shard has no replica the strategy allows.
pub fn read_endpoint(partition: &PartitionHandler, strategy: ReadStrategy) -> Option<&Endpoint> {
    let followers: Vec<&Endpoint> = partition.followers.iter().collect();
    match strategy {
        ReadStrategy::LeaderOnly => partition.leader.as_ref(),
        ReadStrategy::FollowerPreferred => {
            pick(&followers).or(partition.leader.as_ref())
        }
        ReadStrategy::Random => {
            let mut all = followers;
            if let Some(leader) = partition.leader.as_ref() {
                all.push(leader);
            }
            pick(&all)
        }
        ReadStrategy::LeaderFallback => partition.leader.as_ref().or_else(|| pick(&followers)),
    }
}

/// Read endpoint for a shard of `handler`, with the error the façade
/// reports when nothing is available.
pub fn read_target(handler: &TableHandler, pid: u32) -> KestrelResult<Endpoint> {
    let partition = handler.partition(pid)?;
    read_endpoint(partition, handler.read_strategy)
        .cloned()
        .ok_or(KestrelError::NoAvailableReplica {
            table: handler.id,
            shard: pid,
        })
}

/// Leader endpoint for a shard; writes never go anywhere else.
pub fn write_target(handler: &TableHandler, pid: u32) -> KestrelResult<Endpoint> {
    let partition = handler.partition(pid)?;
    partition
        .leader
        .clone()
        .ok_or(KestrelError::NoLeader {
            table: handler.id,
            shard: pid,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use kestrel_codec::ColumnDesc;
    use kestrel_common::{DataType, TableId};

    fn partition(leader: Option<&str>, followers: &[&str]) -> PartitionHandler {
        PartitionHandler::new(
            0,
            leader.map(Endpoint::new),
            followers.iter().copied().map(Endpoint::new).collect(),
        )
    }

    fn handler(leader: Option<&str>, followers: &[&str], strategy: ReadStrategy) -> TableHandler {
        let mut th = TableHandler::new(
            TableId(1),
            "t",
            vec![ColumnDesc::new("k", DataType::Text).index()],
        )
        .with_read_strategy(strategy);
        th.partitions.push(partition(leader, followers));
        th
    }

    #[test]
    fn test_leader_only() {
        let p = partition(Some("l"), &["f1", "f2"]);
        assert_eq!(
            read_endpoint(&p, ReadStrategy::LeaderOnly).unwrap().addr(),
            "l"
        );
        let leaderless = partition(None, &["f1"]);
        assert!(read_endpoint(&leaderless, ReadStrategy::LeaderOnly).is_none());
    }

    #[test]
    fn test_follower_preferred_avoids_leader_when_possible() {
        let p = partition(Some("l"), &["f1", "f2"]);
        for _ in 0..16 {
            let ep = read_endpoint(&p, ReadStrategy::FollowerPreferred).unwrap();
            assert_ne!(ep.addr(), "l");
        }
        let no_followers = partition(Some("l"), &[]);
        assert_eq!(
            read_endpoint(&no_followers, ReadStrategy::FollowerPreferred)
                .unwrap()
                .addr(),
            "l"
        );
    }

    #[test]
    fn test_leader_fallback() {
        let p = partition(Some("l"), &["f1"]);
        assert_eq!(
            read_endpoint(&p, ReadStrategy::LeaderFallback).unwrap().addr(),
            "l"
        );
        let leaderless = partition(None, &["f1"]);
        assert_eq!(
            read_endpoint(&leaderless, ReadStrategy::LeaderFallback)
                .unwrap()
                .addr(),
            "f1"
        );
    }

    #[test]
    fn test_random_rotates_over_all_replicas() {
        let p = partition(Some("l"), &["f1", "f2"]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            seen.insert(
                read_endpoint(&p, ReadStrategy::Random)
                    .unwrap()
                    .addr()
                    .to_string(),
            );
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_no_replica_at_all() {
        let p = partition(None, &[]);
        for strategy in [
            ReadStrategy::LeaderOnly,
            ReadStrategy::FollowerPreferred,
            ReadStrategy::Random,
            ReadStrategy::LeaderFallback,
        ] {
            assert!(read_endpoint(&p, strategy).is_none());
        }
    }

    #[test]
    fn test_targets_surface_typed_errors() {
        let th = handler(None, &[], ReadStrategy::LeaderFallback);
        assert!(matches!(
            read_target(&th, 0),
            Err(KestrelError::NoAvailableReplica { shard: 0, .. })
        ));
        let th = handler(None, &["f1"], ReadStrategy::LeaderFallback);
        assert!(matches!(
            write_target(&th, 0),
            Err(KestrelError::NoLeader { shard: 0, .. })
        ));
        assert!(read_target(&th, 0).is_ok());
    }
}
