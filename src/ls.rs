//! Lock manager.
//!
//! Locks are stored by the backend. This module asks the backend for the
//! lock on a path, decides whether a request may touch a locked resource,
//! hands out new lock tokens and renders locks as XML.
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;
use xmltree::Element;

use crate::backend::{Capabilities, DavBackend, DavLock, LockScope, LockType};
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::xmltree_ext::ElementExt;

/// Timeouts above this are absolute (seconds since the epoch).
pub(crate) const ABSOLUTE_TIMEOUT: u64 = 1_000_000;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A fresh `opaquelocktoken:` URI.
pub(crate) fn new_locktoken() -> String {
    format!("opaquelocktoken:{}", Uuid::new_v4().hyphenated())
}

// only absolute timeouts can expire, we don't know when a
// relative one was set.
pub(crate) fn lock_expired(lock: &DavLock, now: u64) -> bool {
    match lock.timeout {
        Some(t) if t > ABSOLUTE_TIMEOUT => t <= now,
        _ => false,
    }
}

/// `Infinite` or `Second-N`. Absolute timeouts become the remaining seconds.
pub(crate) fn timeout_string(timeout: Option<u64>, now: u64) -> String {
    match timeout {
        None => "Infinite".to_string(),
        Some(t) if t > ABSOLUTE_TIMEOUT => format!("Second-{}", t.saturating_sub(now)),
        Some(t) => format!("Second-{t}"),
    }
}

pub(crate) struct LockManager<'a> {
    backend: &'a dyn DavBackend,
    enabled: bool,
}

impl<'a> LockManager<'a> {
    pub(crate) fn new(backend: &'a dyn DavBackend, caps: &Capabilities) -> LockManager<'a> {
        LockManager {
            backend,
            enabled: caps.checklock,
        }
    }

    /// The active locks on `path`.
    pub(crate) async fn query_locks(&self, path: &DavPath) -> DavResult<Vec<DavLock>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        trace!("checklock {path}");
        let lock = self.backend.checklock(path).await?;
        let now = now_secs();
        Ok(lock
            .into_iter()
            .filter(|l| {
                let expired = lock_expired(l, now);
                if expired {
                    debug!("lock {} on {path} expired", l.token);
                }
                !expired
            })
            .collect())
    }

    /// May a request that submitted `tokens` modify `path`?
    ///
    /// With `exclusive_only`, shared locks don't count. That's the check
    /// for a new shared lock.
    pub(crate) async fn check_lock_status(
        &self,
        path: &DavPath,
        tokens: &[&str],
        exclusive_only: bool,
    ) -> DavResult<bool> {
        let locks = self.query_locks(path).await?;
        Ok(locks.iter().all(|lock| {
            tokens.contains(&lock.token.as_str())
                || (exclusive_only && lock.scope == LockScope::Shared)
        }))
    }
}

fn scope_elem(scope: LockScope) -> Element {
    Element::new2("D:lockscope").child(Element::new2(&format!("D:{}", scope.as_str())))
}

fn type_elem(locktype: LockType) -> Element {
    Element::new2("D:locktype").child(Element::new2(&format!("D:{}", locktype.as_str())))
}

/// `<D:activelock>` for one lock.
pub(crate) fn activelock(lock: &DavLock, now: u64) -> Element {
    let mut elem = Element::new2("D:activelock")
        .child(scope_elem(lock.scope))
        .child(type_elem(lock.locktype))
        .child(Element::new2("D:depth").text(lock.depth.to_string()));
    if let Some(owner) = &lock.owner {
        let mut o = Element::new2("D:owner");
        o.children = owner.children.clone();
        elem = elem.child(o);
    }
    elem.child(Element::new2("D:timeout").text(timeout_string(lock.timeout, now)))
        .child(Element::new2("D:locktoken").child(Element::new2("D:href").text(lock.token.clone())))
}

/// The content of `<D:lockdiscovery>`.
pub(crate) fn lockdiscovery(locks: &[DavLock]) -> Vec<Element> {
    let now = now_secs();
    locks.iter().map(|l| activelock(l, now)).collect()
}

/// The content of `<D:supportedlock>`: exclusive and shared write locks.
pub(crate) fn supportedlock() -> Vec<Element> {
    [LockScope::Exclusive, LockScope::Shared]
        .into_iter()
        .map(|scope| {
            Element::new2("D:lockentry")
                .child(scope_elem(scope))
                .child(type_elem(LockType::Write))
        })
        .collect()
}
