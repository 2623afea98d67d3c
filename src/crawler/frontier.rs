//! Breadth-first frontier of URLs awaiting fetch
//!
//! The frontier stores only canonical URL strings plus the depth and parent
//! needed to record the fetch; node state lives in the site graph store,
//! which is also the authority on whether a URL is still PENDING.

use crate::state::CrawlStatus;
use crate::storage::StorageResult;
use crate::url::UrlPredicate;
use std::collections::{BTreeMap, HashSet, VecDeque};
use url::Url;

/// Read-only view of node state used for deduplication
pub trait NodeLookup {
    /// Status of the node for `url`, or `None` if it was never recorded
    fn node_status(&self, url: &str) -> StorageResult<Option<CrawlStatus>>;
}

/// One queued URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub parent_url: Option<String>,
    pub depth: u32,
}

impl FrontierEntry {
    pub fn new(url: impl Into<String>, parent_url: Option<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            parent_url,
            depth,
        }
    }
}

/// Why an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Already queued, in flight, or no longer PENDING in the graph
    Duplicate,
    /// Frontier full and the URL is not shallower than anything queued
    CapacityExceeded,
    /// Outside the crawl scope or deeper than `max_depth`
    OutOfScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Rejected(RejectReason),
}

/// Depth-ordered, bounded, deduplicated URL queue
pub struct Frontier {
    levels: BTreeMap<u32, VecDeque<FrontierEntry>>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    scope: UrlPredicate,
    max_depth: u32,
    capacity: usize,
    dropped_overflow: u64,
    rejected_depth: u64,
}

impl Frontier {
    pub fn new(scope: UrlPredicate, max_depth: u32, capacity: usize) -> Self {
        Self {
            levels: BTreeMap::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            scope,
            max_depth,
            capacity,
            dropped_overflow: 0,
            rejected_depth: 0,
        }
    }

    /// Offers a URL to the frontier
    ///
    /// When the frontier is full, a URL shallower than the deepest queued
    /// entry evicts that entry; otherwise the new URL is dropped. Either way
    /// the loser is counted in `dropped_overflow`.
    pub fn enqueue(
        &mut self,
        entry: FrontierEntry,
        graph: &dyn NodeLookup,
    ) -> StorageResult<EnqueueOutcome> {
        let in_scope = Url::parse(&entry.url)
            .map(|url| (self.scope)(&url))
            .unwrap_or(false);
        if !in_scope {
            return Ok(EnqueueOutcome::Rejected(RejectReason::OutOfScope));
        }

        if entry.depth > self.max_depth {
            self.rejected_depth += 1;
            return Ok(EnqueueOutcome::Rejected(RejectReason::OutOfScope));
        }

        if self.queued.contains(&entry.url) || self.in_flight.contains(&entry.url) {
            return Ok(EnqueueOutcome::Rejected(RejectReason::Duplicate));
        }

        match graph.node_status(&entry.url)? {
            Some(CrawlStatus::Pending) => {}
            Some(_) => return Ok(EnqueueOutcome::Rejected(RejectReason::Duplicate)),
            None => {
                tracing::debug!("Refusing {}: no node recorded", entry.url);
                return Ok(EnqueueOutcome::Rejected(RejectReason::OutOfScope));
            }
        }

        if self.queued.len() >= self.capacity {
            let deepest = self.levels.keys().next_back().copied();
            match deepest {
                Some(deepest) if deepest > entry.depth => {
                    if let Some(evicted) = self.pop_deepest() {
                        tracing::debug!("Frontier full, evicted {}", evicted.url);
                    }
                    self.dropped_overflow += 1;
                }
                _ => {
                    self.dropped_overflow += 1;
                    return Ok(EnqueueOutcome::Rejected(RejectReason::CapacityExceeded));
                }
            }
        }

        self.queued.insert(entry.url.clone());
        self.levels.entry(entry.depth).or_default().push_back(entry);
        Ok(EnqueueOutcome::Accepted)
    }

    /// Removes up to `n` entries in breadth-first order and marks them in flight
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<FrontierEntry> {
        let mut batch = Vec::with_capacity(n.min(self.queued.len()));

        while batch.len() < n {
            let Some(mut level) = self.levels.first_entry() else {
                break;
            };
            let Some(entry) = level.get_mut().pop_front() else {
                level.remove();
                continue;
            };
            if level.get().is_empty() {
                level.remove();
            }

            self.queued.remove(&entry.url);
            self.in_flight.insert(entry.url.clone());
            batch.push(entry);
        }

        batch
    }

    /// Clears the in-flight marker after a fetch finished or was abandoned
    pub fn release(&mut self, url: &str) -> bool {
        self.in_flight.remove(url)
    }

    /// Puts an in-flight entry back at the front of its level
    ///
    /// Used when a dispatched fetch was abandoned before any write.
    pub fn restore(&mut self, entry: FrontierEntry) {
        if self.in_flight.remove(&entry.url) && self.queued.insert(entry.url.clone()) {
            self.levels.entry(entry.depth).or_default().push_front(entry);
        }
    }

    fn pop_deepest(&mut self) -> Option<FrontierEntry> {
        let mut level = self.levels.last_entry()?;
        let entry = level.get_mut().pop_back();
        if level.get().is_empty() {
            level.remove();
        }
        if let Some(entry) = &entry {
            self.queued.remove(&entry.url);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.in_flight.contains(url)
    }

    /// Shallowest queued depth
    pub fn current_depth(&self) -> Option<u32> {
        self.levels.keys().next().copied()
    }

    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow
    }

    /// URLs refused for exceeding `max_depth`
    pub fn rejected_depth(&self) -> u64 {
        self.rejected_depth
    }
}
