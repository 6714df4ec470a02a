/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

//! Bookkeeping for peer link identity and deduplication.
//!
//! The registry answers the two questions that make the mesh converge:
//!
//! 1. Should a join announcement originate a new link? At most one
//!    origination per peer address, so at-least-once join delivery is safe.
//! 2. When a link finishes negotiating, is it the winner? Both sides of a
//!    simultaneous bidirectional origination negotiate in parallel; the
//!    first link to open under a given remote user id wins and the later
//!    duplicate must be closed.
//!
//! The registry holds no browser objects and no callbacks; the session
//! manager owns the links themselves.

pub(crate) type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkRole {
    /// We originated after a join announcement.
    Outbound,
    /// We answered a remote offer.
    Inbound,
}

/// Verdict for a link that just finished negotiating.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum OpenOutcome {
    Opened,
    /// Another link already serves this user; close the newcomer and keep
    /// the one that opened first.
    Duplicate { keep: LinkId },
}

#[derive(Debug, Clone)]
struct LinkRecord {
    id: LinkId,
    role: LinkRole,
    user_id: String,
    peer_addr: String,
    conn_id: String,
    open: bool,
}

#[derive(Debug, Default)]
pub(crate) struct LinkRegistry {
    next_id: LinkId,
    records: Vec<LinkRecord>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an origination toward `peer_addr`, minting the connection
    /// id the whole negotiation will be correlated by. Returns `None` when
    /// an origination toward that address already exists (duplicate join).
    pub fn begin_outbound(
        &mut self,
        user_id: &str,
        peer_addr: &str,
        local_addr: &str,
    ) -> Option<(LinkId, String)> {
        if self
            .records
            .iter()
            .any(|r| r.role == LinkRole::Outbound && r.peer_addr == peer_addr)
        {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let conn_id = format!("{local_addr}#{id}");
        self.records.push(LinkRecord {
            id,
            role: LinkRole::Outbound,
            user_id: user_id.to_owned(),
            peer_addr: peer_addr.to_owned(),
            conn_id: conn_id.clone(),
            open: false,
        });
        Some((id, conn_id))
    }

    /// Register an answering link for a remote offer. Returns `None` when
    /// the connection id is already known (re-sent offer).
    pub fn begin_inbound(
        &mut self,
        user_id: &str,
        peer_addr: &str,
        conn_id: &str,
    ) -> Option<LinkId> {
        if self.records.iter().any(|r| r.conn_id == conn_id) {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(LinkRecord {
            id,
            role: LinkRole::Inbound,
            user_id: user_id.to_owned(),
            peer_addr: peer_addr.to_owned(),
            conn_id: conn_id.to_owned(),
            open: false,
        });
        Some(id)
    }

    /// Record that a link finished negotiating. `None` for ids the registry
    /// no longer tracks (e.g. the member left mid-negotiation).
    pub fn mark_open(&mut self, id: LinkId) -> Option<OpenOutcome> {
        let user_id = self.records.iter().find(|r| r.id == id)?.user_id.clone();
        if let Some(existing) = self
            .records
            .iter()
            .find(|r| r.open && r.user_id == user_id && r.id != id)
        {
            return Some(OpenOutcome::Duplicate { keep: existing.id });
        }
        let record = self.records.iter_mut().find(|r| r.id == id)?;
        record.open = true;
        Some(OpenOutcome::Opened)
    }

    /// Drop one link from the books.
    pub fn forget(&mut self, id: LinkId) {
        self.records.retain(|r| r.id != id);
    }

    /// A member left: drop every link negotiated with their address and
    /// return the ids so the owner can close them. Idempotent.
    pub fn drop_addr(&mut self, peer_addr: &str) -> Vec<LinkId> {
        let ids = self
            .records
            .iter()
            .filter(|r| r.peer_addr == peer_addr)
            .map(|r| r.id)
            .collect::<Vec<_>>();
        self.records.retain(|r| r.peer_addr != peer_addr);
        ids
    }

    pub fn link_for_conn(&self, conn_id: &str) -> Option<LinkId> {
        self.records.iter().find(|r| r.conn_id == conn_id).map(|r| r.id)
    }

    pub fn open_link_for_user(&self, user_id: &str) -> Option<LinkId> {
        self.records
            .iter()
            .find(|r| r.open && r.user_id == user_id)
            .map(|r| r.id)
    }

    pub fn open_count(&self) -> usize {
        self.records.iter().filter(|r| r.open).count()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_join_announcements_are_no_ops() {
        let mut registry = LinkRegistry::new();
        assert!(registry.begin_outbound("bob", "bob-1", "alice-9").is_some());
        assert!(registry.begin_outbound("bob", "bob-1", "alice-9").is_none());
    }

    #[test]
    fn resent_offers_are_no_ops() {
        let mut registry = LinkRegistry::new();
        assert!(registry.begin_inbound("bob", "bob-1", "bob-1#0").is_some());
        assert!(registry.begin_inbound("bob", "bob-1", "bob-1#0").is_none());
    }

    #[test]
    fn glare_converges_to_one_open_link() {
        let mut registry = LinkRegistry::new();
        // Both sides originate at once: our outbound link plus their offer.
        let (ours, _) = registry.begin_outbound("bob", "bob-1", "alice-9").unwrap();
        let theirs = registry.begin_inbound("bob", "bob-1", "bob-1#0").unwrap();

        assert_eq!(registry.mark_open(theirs), Some(OpenOutcome::Opened));
        assert_eq!(
            registry.mark_open(ours),
            Some(OpenOutcome::Duplicate { keep: theirs })
        );
        registry.forget(ours);

        assert_eq!(registry.open_count(), 1);
        assert_eq!(registry.open_link_for_user("bob"), Some(theirs));
    }

    #[test]
    fn open_links_never_exceed_known_members() {
        let mut registry = LinkRegistry::new();
        let members = ["bob-1", "carol-2", "dave-3"];
        for (i, addr) in members.iter().enumerate() {
            let user = addr.split('-').next().unwrap();
            let (id, _) = registry.begin_outbound(user, addr, "alice-9").unwrap();
            assert_eq!(registry.mark_open(id), Some(OpenOutcome::Opened));
            assert_eq!(registry.open_count(), i + 1);
        }
        assert!(registry.open_count() <= members.len());

        // Every leave releases exactly that member's link.
        for (i, addr) in members.iter().enumerate() {
            assert_eq!(registry.drop_addr(addr).len(), 1);
            assert_eq!(registry.open_count(), members.len() - i - 1);
        }
    }

    #[test]
    fn no_link_survives_its_members_leave() {
        let mut registry = LinkRegistry::new();
        let (id, conn) = registry.begin_outbound("bob", "bob-1", "alice-9").unwrap();
        registry.mark_open(id);

        let dropped = registry.drop_addr("bob-1");
        assert_eq!(dropped, vec![id]);
        assert_eq!(registry.open_link_for_user("bob"), None);
        assert_eq!(registry.link_for_conn(&conn), None);

        // A second leave for the same address is harmless.
        assert!(registry.drop_addr("bob-1").is_empty());
    }

    #[test]
    fn a_member_can_rejoin_with_a_fresh_address() {
        let mut registry = LinkRegistry::new();
        let (old, _) = registry.begin_outbound("bob", "bob-1", "alice-9").unwrap();
        registry.mark_open(old);
        registry.drop_addr("bob-1");

        let (new, _) = registry.begin_outbound("bob", "bob-7", "alice-9").unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.mark_open(new), Some(OpenOutcome::Opened));
        assert_eq!(registry.open_link_for_user("bob"), Some(new));
    }

    #[test]
    fn late_open_after_leave_is_ignored() {
        let mut registry = LinkRegistry::new();
        let (id, _) = registry.begin_outbound("bob", "bob-1", "alice-9").unwrap();
        registry.drop_addr("bob-1");
        assert_eq!(registry.mark_open(id), None);
    }

    #[test]
    fn glare_losers_never_become_the_open_link() {
        let mut registry = LinkRegistry::new();
        let (ours, _) = registry.begin_outbound("bob", "bob-1", "alice-9").unwrap();
        let theirs = registry.begin_inbound("bob", "bob-1", "bob-1#0").unwrap();
        registry.mark_open(ours);
        assert_eq!(
            registry.mark_open(theirs),
            Some(OpenOutcome::Duplicate { keep: ours })
        );
        registry.forget(theirs);

        assert_eq!(registry.open_count(), 1);
        assert_eq!(registry.open_link_for_user("bob"), Some(ours));
    }
}
