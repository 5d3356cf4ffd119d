// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Link Cache
//!
//! Read-through cache of store answers used by the resolution engine:
//! `(from, to)` authorizing-link lookups (negative answers included) and
//! per-agent delegate target lists.
//!
//! Coherency rules:
//! - Entries expire after a TTL, which bounds staleness if an invalidation
//!   is missed.
//! - Every invalidation bumps an epoch. A fill that started under an older
//!   epoch is discarded instead of inserted, so a fetch racing a mutation
//!   can never re-populate the cache with the pre-mutation view.
//! - A reverse index maps each link id to the entries that contain it.
//! - Expired entries are dropped when read, and swept every
//!   [`SWEEP_EVERY`] fills, so the maps hold at most what was filled within
//!   one TTL plus one sweep interval.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::link::{AgentId, DelegateTarget, DelegationLink, LinkId};

/// Fills between two sweeps of expired entries.
pub const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKey {
    Pair(AgentId, AgentId),
    Targets(AgentId),
}

struct Cached<T> {
    value: T,
    expires_at: Instant,
}

/// Token captured before a store fetch; fills presenting a stale token are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(u64);

pub struct LinkCache {
    ttl: Duration,
    // Write-locked by invalidations, read-locked by fills.
    epoch: RwLock<u64>,
    pairs: DashMap<(AgentId, AgentId), Cached<Option<DelegationLink>>>,
    targets: DashMap<AgentId, Cached<Vec<DelegateTarget>>>,
    by_link: DashMap<LinkId, HashSet<CacheKey>>,
    fills: AtomicU64,
}

impl LinkCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            epoch: RwLock::new(0),
            pairs: DashMap::new(),
            targets: DashMap::new(),
            by_link: DashMap::new(),
            fills: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn fill_token(&self) -> FillToken {
        FillToken(*self.epoch.read())
    }

    /// `Some(answer)` on a fresh hit, where the answer itself may be `None`.
    pub fn get_pair(&self, from: AgentId, to: AgentId) -> Option<Option<DelegationLink>> {
        let now = Instant::now();
        {
            let entry = self.pairs.get(&(from, to))?;
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        self.pairs.remove_if(&(from, to), |_, e| e.expires_at <= now);
        None
    }

    pub fn get_targets(&self, from: AgentId) -> Option<Vec<DelegateTarget>> {
        let now = Instant::now();
        {
            let entry = self.targets.get(&from)?;
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        self.targets.remove_if(&from, |_, e| e.expires_at <= now);
        None
    }

    pub fn fill_pair(
        &self,
        token: FillToken,
        from: AgentId,
        to: AgentId,
        link: Option<DelegationLink>,
    ) -> bool {
        let epoch = self.epoch.read();
        if *epoch != token.0 {
            return false;
        }
        if let Some(link) = &link {
            self.index(link.id, CacheKey::Pair(from, to));
        }
        self.pairs.insert(
            (from, to),
            Cached {
                value: link,
                expires_at: Instant::now() + self.ttl,
            },
        );
        drop(epoch);
        self.after_fill();
        true
    }

    pub fn fill_targets(&self, token: FillToken, from: AgentId, targets: Vec<DelegateTarget>) -> bool {
        let epoch = self.epoch.read();
        if *epoch != token.0 {
            return false;
        }
        for target in &targets {
            self.index(target.link.id, CacheKey::Targets(from));
        }
        self.targets.insert(
            from,
            Cached {
                value: targets,
                expires_at: Instant::now() + self.ttl,
            },
        );
        drop(epoch);
        self.after_fill();
        true
    }

    fn after_fill(&self) {
        if (self.fills.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.sweep_expired();
        }
    }

    /// Drop expired entries and index keys whose entry is gone.
    pub fn sweep_expired(&self) -> usize {
        // Excludes concurrent fills so the index prune sees a settled map.
        let _epoch = self.epoch.write();
        let now = Instant::now();
        let before = self.len();
        self.pairs.retain(|_, e| e.expires_at > now);
        self.targets.retain(|_, e| e.expires_at > now);
        self.prune_index();
        let swept = before.saturating_sub(self.len());
        if swept > 0 {
            debug!(swept, "Expired link cache entries swept");
        }
        swept
    }

    fn prune_index(&self) {
        self.by_link.retain(|_, keys| {
            keys.retain(|key| match key {
                CacheKey::Pair(from, to) => self.pairs.contains_key(&(*from, *to)),
                CacheKey::Targets(from) => self.targets.contains_key(from),
            });
            !keys.is_empty()
        });
    }

    fn index(&self, link_id: LinkId, key: CacheKey) {
        self.by_link.entry(link_id).or_default().insert(key);
    }

    fn remove_key(&self, key: CacheKey) {
        match key {
            CacheKey::Pair(from, to) => {
                self.pairs.remove(&(from, to));
            }
            CacheKey::Targets(from) => {
                self.targets.remove(&from);
            }
        }
    }

    /// Drop every entry known to contain `link_id`. Returns the count dropped.
    pub fn invalidate_link(&self, link_id: LinkId) -> usize {
        let mut epoch = self.epoch.write();
        *epoch += 1;
        let keys = self
            .by_link
            .remove(&link_id)
            .map(|(_, keys)| keys)
            .unwrap_or_default();
        for key in &keys {
            self.remove_key(*key);
        }
        keys.len()
    }

    /// Drop every entry either agent appears in, including negative answers.
    pub fn invalidate_agents(&self, agents: &[AgentId]) {
        let mut epoch = self.epoch.write();
        *epoch += 1;
        self.pairs
            .retain(|(from, to), _| !agents.contains(from) && !agents.contains(to));
        for agent in agents {
            self.targets.remove(agent);
        }
        self.prune_index();
    }

    pub fn clear(&self) {
        let mut epoch = self.epoch.write();
        *epoch += 1;
        self.pairs.clear();
        self.targets.clear();
        self.by_link.clear();
        debug!("Link cache flushed");
    }

    pub fn len(&self) -> usize {
        self.pairs.len() + self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::link::{LinkDirection, NewLink};
    use chrono::Utc;

    fn link(a: AgentId, b: AgentId) -> DelegationLink {
        NewLink::new(a, b, LinkDirection::Outbound).into_link(Utc::now())
    }

    #[test]
    fn test_hit_then_invalidate_by_link() {
        let cache = LinkCache::new(Duration::from_secs(60));
        let (a, b) = (AgentId::new(), AgentId::new());
        let l = link(a, b);

        assert!(cache.fill_pair(cache.fill_token(), a, b, Some(l.clone())));
        assert_eq!(cache.get_pair(a, b), Some(Some(l.clone())));

        assert_eq!(cache.invalidate_link(l.id), 1);
        assert_eq!(cache.get_pair(a, b), None);
    }

    #[test]
    fn test_negative_answers_dropped_by_agent() {
        let cache = LinkCache::new(Duration::from_secs(60));
        let (a, b, c) = (AgentId::new(), AgentId::new(), AgentId::new());
        cache.fill_pair(cache.fill_token(), a, b, None);
        cache.fill_pair(cache.fill_token(), c, b, None);
        assert_eq!(cache.get_pair(a, b), Some(None));

        cache.invalidate_agents(&[a]);
        assert_eq!(cache.get_pair(a, b), None);
        assert_eq!(cache.get_pair(c, b), Some(None));
    }

    #[test]
    fn test_stale_fill_is_discarded() {
        let cache = LinkCache::new(Duration::from_secs(60));
        let (a, b) = (AgentId::new(), AgentId::new());

        let token = cache.fill_token();
        cache.invalidate_link(LinkId::new());
        assert!(!cache.fill_pair(token, a, b, Some(link(a, b))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let cache = LinkCache::new(Duration::ZERO);
        let (a, b) = (AgentId::new(), AgentId::new());
        cache.fill_pair(cache.fill_token(), a, b, None);
        assert_eq!(cache.get_pair(a, b), None);
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let cache = LinkCache::new(Duration::ZERO);
        let (a, b) = (AgentId::new(), AgentId::new());
        cache.fill_pair(cache.fill_token(), a, b, Some(link(a, b)));
        cache.fill_targets(cache.fill_token(), a, vec![]);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.get_pair(a, b), None);
        assert!(cache.get_targets(a).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_fills_stay_bounded() {
        let cache = LinkCache::new(Duration::ZERO);
        for _ in 0..10_000 {
            let (a, b) = (AgentId::new(), AgentId::new());
            cache.fill_pair(cache.fill_token(), a, b, None);
        }
        assert!(cache.len() < SWEEP_EVERY as usize);

        for _ in 0..10_000 {
            let (a, b) = (AgentId::new(), AgentId::new());
            cache.fill_pair(cache.fill_token(), a, b, Some(link(a, b)));
        }
        assert!(cache.len() < SWEEP_EVERY as usize);
        assert!(cache.by_link.len() < SWEEP_EVERY as usize);
    }

    #[test]
    fn test_invalidate_agents_prunes_link_index() {
        let cache = LinkCache::new(Duration::from_secs(60));
        let (a, b, c) = (AgentId::new(), AgentId::new(), AgentId::new());
        let (ab, cb) = (link(a, b), link(c, b));
        cache.fill_pair(cache.fill_token(), a, b, Some(ab.clone()));
        cache.fill_pair(cache.fill_token(), c, b, Some(cb.clone()));

        cache.invalidate_agents(&[a]);
        assert!(!cache.by_link.contains_key(&ab.id));
        assert!(cache.by_link.contains_key(&cb.id));
        assert_eq!(cache.sweep_expired(), 0);
        assert_eq!(cache.get_pair(c, b), Some(Some(cb)));
    }

    #[test]
    fn test_targets_indexed_by_each_link() {
        let cache = LinkCache::new(Duration::from_secs(60));
        let a = AgentId::new();
        let l = link(a, AgentId::new());
        let target = DelegateTarget {
            agent_id: l.target_agent_id,
            agent_key: "b".into(),
            display_name: None,
            description: None,
            team_name: None,
            link: l.clone(),
        };
        cache.fill_targets(cache.fill_token(), a, vec![target]);
        assert_eq!(cache.get_targets(a).map(|t| t.len()), Some(1));

        cache.invalidate_link(l.id);
        assert!(cache.get_targets(a).is_none());

        cache.fill_targets(cache.fill_token(), a, vec![]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
