//! # Credential Store Module
//!
//! Membership sets (admins, trusted users, join queue, blocked) and the PIN
//! hashes stored in place of users' raw PINs.
//!
//! Invariants kept by every mutation:
//! - `admins ⊆ users`
//! - a username is in at most one of `users`, `queue`, `blocked`

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

/// Where a username currently sits in the membership sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Admin,
    User,
    Queued,
    Blocked,
    Unknown,
}

impl Membership {
    /// Trusted users, admins included
    pub fn is_user(self) -> bool {
        matches!(self, Membership::Admin | Membership::User)
    }
}

/// Result of an approve request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveOutcome {
    Approved,
    AlreadyApproved,
}

/// Result of a block request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Blocked,
    AlreadyBlocked,
    ProtectedAdmin,
}

/// Result of a self-service join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Added,
    AlreadyQueued,
    AlreadyMember { is_admin: bool },
    Blocked,
}

/// Membership sets plus per-user PIN hashes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    admins: BTreeSet<String>,
    users: BTreeSet<String>,
    queue: BTreeSet<String>,
    blocked: BTreeSet<String>,
    pins: BTreeMap<String, String>,
}

impl CredentialStore {
    /// Build a store from raw lists, resolving any overlap between sets.
    ///
    /// Blocked wins over everything; trusted users win over the queue.
    pub fn new<I, J, K, L>(admins: I, users: J, queue: K, blocked: L, pins: BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
        L: IntoIterator<Item = String>,
    {
        let blocked: BTreeSet<String> = blocked.into_iter().map(normalize_username).collect();
        let mut admins: BTreeSet<String> = admins.into_iter().map(normalize_username).collect();
        let mut users: BTreeSet<String> = users.into_iter().map(normalize_username).collect();
        let mut queue: BTreeSet<String> = queue.into_iter().map(normalize_username).collect();

        for name in &blocked {
            let removed = [admins.remove(name), users.remove(name), queue.remove(name)];
            if removed.contains(&true) {
                warn!(user = %name, "Blocked user also listed as member; keeping the block");
            }
        }
        users.extend(admins.iter().cloned());
        for name in &users {
            if queue.remove(name) {
                warn!(user = %name, "Trusted user also listed in the queue; removing from queue");
            }
        }

        let pins = pins
            .into_iter()
            .map(|(name, hash)| (normalize_username(name), hash.trim().to_lowercase()))
            .filter(|(_, hash)| !hash.is_empty())
            .collect();

        Self {
            admins,
            users,
            queue,
            blocked,
            pins,
        }
    }

    pub fn membership(&self, username: &str) -> Membership {
        if self.blocked.contains(username) {
            Membership::Blocked
        } else if self.admins.contains(username) {
            Membership::Admin
        } else if self.users.contains(username) {
            Membership::User
        } else if self.queue.contains(username) {
            Membership::Queued
        } else {
            Membership::Unknown
        }
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.contains(username)
    }

    /// Trusted users, admins included
    pub fn is_user(&self, username: &str) -> bool {
        self.users.contains(username)
    }

    pub fn is_queued(&self, username: &str) -> bool {
        self.queue.contains(username)
    }

    pub fn is_blocked(&self, username: &str) -> bool {
        self.blocked.contains(username)
    }

    pub fn pin_hash(&self, username: &str) -> Option<&str> {
        self.pins.get(username).map(String::as_str)
    }

    /// Record the agreed PIN hash. Only trusted users carry credentials.
    pub fn set_pin_hash(&mut self, username: &str, hash: String) -> bool {
        if !self.users.contains(username) {
            return false;
        }
        self.pins.insert(username.to_string(), hash);
        true
    }

    /// Move a username into the trusted users with an unset PIN hash
    pub fn approve(&mut self, username: &str) -> ApproveOutcome {
        if self.users.contains(username) {
            return ApproveOutcome::AlreadyApproved;
        }
        // Either removal may find nothing when another admin got there first
        self.queue.remove(username);
        self.blocked.remove(username);
        self.pins.remove(username);
        self.users.insert(username.to_string());
        ApproveOutcome::Approved
    }

    /// Move a username into the blocked set
    pub fn block(&mut self, username: &str) -> BlockOutcome {
        if self.admins.contains(username) {
            return BlockOutcome::ProtectedAdmin;
        }
        if self.blocked.contains(username) {
            return BlockOutcome::AlreadyBlocked;
        }
        self.queue.remove(username);
        self.users.remove(username);
        self.blocked.insert(username.to_string());
        BlockOutcome::Blocked
    }

    /// Self-service request to enter the join queue
    pub fn join(&mut self, username: &str) -> JoinOutcome {
        match self.membership(username) {
            Membership::Blocked => JoinOutcome::Blocked,
            Membership::Queued => JoinOutcome::AlreadyQueued,
            Membership::Admin => JoinOutcome::AlreadyMember { is_admin: true },
            Membership::User => JoinOutcome::AlreadyMember { is_admin: false },
            Membership::Unknown => {
                self.queue.insert(username.to_string());
                JoinOutcome::Added
            }
        }
    }

    /// Return a trusted user to the queue after too many wrong PINs.
    ///
    /// The stored PIN hash is left in place; a later approval clears it.
    pub fn evict_to_queue(&mut self, username: &str) -> bool {
        let was_user = self.users.remove(username);
        self.admins.remove(username);
        if was_user {
            self.queue.insert(username.to_string());
        }
        was_user
    }

    pub fn admins(&self) -> impl Iterator<Item = &str> {
        self.admins.iter().map(String::as_str)
    }

    /// Trusted users that are not admins
    pub fn plain_users(&self) -> impl Iterator<Item = &str> {
        self.users
            .iter()
            .filter(|name| !self.admins.contains(*name))
            .map(String::as_str)
    }

    pub fn queue(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn blocked(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(String::as_str)
    }

    pub fn pins(&self) -> &BTreeMap<String, String> {
        &self.pins
    }
}

/// Usernames are stored without the leading `@` Telegram shows
pub fn normalize_username(name: String) -> String {
    let trimmed = name.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).to_string()
}
