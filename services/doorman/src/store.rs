//! Per-resource lease bookkeeping.
//!
//! A [`LeaseStore`] maps client ids to their current [`Lease`] and keeps
//! `sum_has`/`sum_want` aggregates in step with every mutation, so deciding
//! a request never has to walk the whole map.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// A client's current grant for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lease {
    pub has: i32,
    pub want: i32,
    /// Unset for a zero (absent or expired) lease.
    pub expire_time: Option<DateTime<Utc>>,
    pub refresh_interval: Duration,
}

impl Lease {
    pub fn is_zero(&self) -> bool {
        self.expire_time.is_none()
    }
}

/// Leases held against a single resource.
#[derive(Debug)]
pub struct LeaseStore {
    resource_id: String,
    leases: HashMap<String, Lease>,
    sum_has: i64,
    sum_want: i64,
}

impl LeaseStore {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            leases: HashMap::new(),
            sum_has: 0,
            sum_want: 0,
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// The client's lease, or a zero lease if it holds none.
    pub fn get(&self, client_id: &str) -> Lease {
        self.leases.get(client_id).copied().unwrap_or_default()
    }

    /// Create or overwrite the client's lease, expiring `lease_length` from now.
    pub fn assign(
        &mut self,
        client_id: &str,
        lease_length: Duration,
        refresh_interval: Duration,
        has: i32,
        want: i32,
    ) -> Lease {
        self.assign_at(Utc::now(), client_id, lease_length, refresh_interval, has, want)
    }

    pub(crate) fn assign_at(
        &mut self,
        now: DateTime<Utc>,
        client_id: &str,
        lease_length: Duration,
        refresh_interval: Duration,
        has: i32,
        want: i32,
    ) -> Lease {
        let previous = self.get(client_id);
        self.sum_has += i64::from(has) - i64::from(previous.has);
        self.sum_want += i64::from(want) - i64::from(previous.want);

        let lease = Lease {
            has,
            want,
            expire_time: Some(expiry_after(now, lease_length)),
            refresh_interval,
        };
        self.leases.insert(client_id.to_string(), lease);
        lease
    }

    /// Drop the client's lease. No-op if it holds none.
    pub fn release(&mut self, client_id: &str) {
        if let Some(lease) = self.leases.remove(client_id) {
            self.sum_has -= i64::from(lease.has);
            self.sum_want -= i64::from(lease.want);
        }
    }

    /// Remove every lease that expired before now. Returns how many were removed.
    pub fn clean(&mut self) -> usize {
        self.clean_at(Utc::now())
    }

    pub(crate) fn clean_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.leases.len();
        let sum_has = &mut self.sum_has;
        let sum_want = &mut self.sum_want;

        self.leases.retain(|_, lease| {
            let expired = lease.expire_time.is_some_and(|at| at < now);
            if expired {
                *sum_has -= i64::from(lease.has);
                *sum_want -= i64::from(lease.want);
            }
            !expired
        });

        before - self.leases.len()
    }

    /// Number of clients currently holding a lease.
    pub fn count(&self) -> usize {
        self.leases.len()
    }

    pub fn sum_has(&self) -> i64 {
        self.sum_has
    }

    pub fn sum_want(&self) -> i64 {
        self.sum_want
    }
}

fn expiry_after(now: DateTime<Utc>, length: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(length)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn test_store_aggregates_and_expiry() {
        let mut store = LeaseStore::new("test");
        store.assign_at(at(0), "c1", 3 * SECOND, SECOND, 10, 12);
        store.assign_at(at(0), "c2", 3 * SECOND, SECOND, 10, 12);
        store.assign_at(at(0), "c3", 5 * SECOND, SECOND, 15, 20);

        assert_eq!(store.sum_has(), 35);
        assert_eq!(store.sum_want(), 44);
        assert_eq!(store.get("c1").has, 10);
        assert_eq!(store.count(), 3);

        // Expiry is strict: a lease expiring exactly now survives.
        assert_eq!(store.clean_at(at(3)), 0);
        assert_eq!(store.count(), 3);

        assert_eq!(store.clean_at(at(4)), 2);
        assert_eq!(store.sum_has(), 15);
        assert_eq!(store.sum_want(), 20);
        assert_eq!(store.count(), 1);
        assert!(store.get("c1").is_zero());
        assert_eq!(store.get("c3").has, 15);
    }

    #[test]
    fn test_assign_sets_expiry_and_refresh() {
        let mut store = LeaseStore::new("test");
        let lease = store.assign_at(at(0), "c1", 20 * SECOND, 5 * SECOND, 1, 2);

        assert_eq!(lease.expire_time, Some(at(20)));
        assert_eq!(lease.refresh_interval, 5 * SECOND);
        assert_eq!(store.get("c1"), lease);
    }

    #[test]
    fn test_assign_is_idempotent_on_aggregates() {
        let mut store = LeaseStore::new("test");
        store.assign_at(at(0), "c1", SECOND, SECOND, 10, 12);
        store.assign_at(at(0), "c1", SECOND, SECOND, 10, 12);

        assert_eq!(store.sum_has(), 10);
        assert_eq!(store.sum_want(), 12);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_assign_overwrite_adjusts_aggregates() {
        let mut store = LeaseStore::new("test");
        store.assign_at(at(0), "c1", SECOND, SECOND, 10, 12);
        store.assign_at(at(0), "c1", SECOND, SECOND, 4, 30);

        assert_eq!(store.sum_has(), 4);
        assert_eq!(store.sum_want(), 30);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_release() {
        let mut store = LeaseStore::new("test");
        store.assign_at(at(0), "c1", SECOND, SECOND, 10, 12);
        store.assign_at(at(0), "c2", SECOND, SECOND, 1, 2);

        store.release("c1");
        assert_eq!(store.sum_has(), 1);
        assert_eq!(store.sum_want(), 2);
        assert_eq!(store.count(), 1);
        assert!(store.get("c1").is_zero());

        store.release("missing");
        assert_eq!(store.sum_has(), 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_get_absent_is_zero() {
        let store = LeaseStore::new("test");
        let lease = store.get("nobody");
        assert!(lease.is_zero());
        assert_eq!(lease, Lease::default());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Assign {
            client: u8,
            ttl: u64,
            has: i32,
            want: i32,
        },
        Release {
            client: u8,
        },
        Clean {
            after: i64,
        },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..5, 0u64..10, 0i32..1000, 0i32..1000)
                .prop_map(|(client, ttl, has, want)| Op::Assign { client, ttl, has, want }),
            (0u8..5).prop_map(|client| Op::Release { client }),
            (0i64..10).prop_map(|after| Op::Clean { after }),
        ]
    }

    proptest! {
        #[test]
        fn prop_aggregates_match_live_leases(ops in proptest::collection::vec(op(), 0..64)) {
            let mut store = LeaseStore::new("prop");
            let mut clock = 0i64;

            for op in ops {
                match op {
                    Op::Assign { client, ttl, has, want } => {
                        let client = format!("c{client}");
                        let ttl = Duration::from_secs(ttl);
                        store.assign_at(at(clock), &client, ttl, SECOND, has, want);
                    }
                    Op::Release { client } => store.release(&format!("c{client}")),
                    Op::Clean { after } => {
                        clock += after;
                        let now = at(clock);
                        store.clean_at(now);
                        prop_assert!(store
                            .leases
                            .values()
                            .all(|l| l.expire_time.is_some_and(|t| t >= now)));
                    }
                }

                let has: i64 = store.leases.values().map(|l| i64::from(l.has)).sum();
                let want: i64 = store.leases.values().map(|l| i64::from(l.want)).sum();
                prop_assert_eq!(store.sum_has(), has);
                prop_assert_eq!(store.sum_want(), want);
                prop_assert_eq!(store.count(), store.leases.len());
            }
        }
    }
}
