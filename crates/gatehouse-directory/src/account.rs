//! Account and avatar record shapes.
//!
//! These are the persistent structures the session core reads and writes.
//! Timestamps are unix seconds (`u64`) — they cross process restarts and
//! serialize flat.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use gatehouse_protocol::{AVATAR_SLOTS, AccountId, AvatarId, NameReview};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

// ---------------------------------------------------------------------------
// Access levels
// ---------------------------------------------------------------------------

/// Coarse authorization tier stored on the account and propagated to the
/// active avatar session.
///
/// Stored as a string in the directory (the provider supplies strings);
/// unknown strings degrade to `User` rather than failing the login.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum AccessLevel {
    /// Ordinary player.
    #[default]
    User,
    /// Community moderator.
    Moderator,
    /// Game staff.
    Admin,
    /// Operations / root access.
    SystemAdmin,
}

impl AccessLevel {
    /// Parses the directory's string form. Unknown values map to `User`.
    pub fn parse(s: &str) -> AccessLevel {
        match s {
            "MODERATOR" => AccessLevel::Moderator,
            "ADMIN" => AccessLevel::Admin,
            "SYSTEM_ADMIN" => AccessLevel::SystemAdmin,
            _ => AccessLevel::User,
        }
    }

    /// The string form persisted in the directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::User => "USER",
            AccessLevel::Moderator => "MODERATOR",
            AccessLevel::Admin => "ADMIN",
            AccessLevel::SystemAdmin => "SYSTEM_ADMIN",
        }
    }

    /// The numeric rank stamped onto activated avatar objects.
    pub fn rank(&self) -> u16 {
        match self {
            AccessLevel::User => 100,
            AccessLevel::Moderator => 300,
            AccessLevel::Admin => 400,
            AccessLevel::SystemAdmin => 700,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One removed avatar, kept for support/audit purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedAvatar {
    /// The avatar that was removed.
    pub avatar_id: AvatarId,
    /// When it was removed (unix seconds).
    pub removed_at: u64,
}

/// A persistent account record.
///
/// Created by the first successful login for a play token; never deleted
/// by the session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Internal id, assigned by the record store on creation.
    pub account_id: AccountId,
    /// Provider-specific external identity. Unique across accounts.
    pub play_token: String,
    /// Authorization tier.
    pub access_level: AccessLevel,
    /// Fixed-size ordered avatar slots; [`AvatarId::EMPTY`] marks a free
    /// slot. Always sanitize with [`Account::sanitized_slots`] after a
    /// fetch — a hand-edited backend may hold a short or long list.
    pub avatar_slots: Vec<AvatarId>,
    /// Append-only history of removed avatars.
    pub removed_avatars: Vec<RemovedAvatar>,
    /// Creation time (unix seconds).
    pub created_at: u64,
    /// Last successful login (unix seconds).
    pub last_login_at: u64,
}

impl Account {
    /// A fresh account with all slots empty, as created on first login.
    pub fn fresh(play_token: &str, access_level: AccessLevel) -> Account {
        let now = unix_now();
        Account {
            account_id: AccountId(0), // assigned by the store
            play_token: play_token.to_string(),
            access_level,
            avatar_slots: vec![AvatarId::EMPTY; AVATAR_SLOTS],
            removed_avatars: Vec::new(),
            created_at: now,
            last_login_at: now,
        }
    }

    /// The slot list forced to exactly [`AVATAR_SLOTS`] entries:
    /// truncated if long, padded with empties if short.
    pub fn sanitized_slots(&self) -> Vec<AvatarId> {
        let mut slots = self.avatar_slots.clone();
        slots.truncate(AVATAR_SLOTS);
        slots.resize(AVATAR_SLOTS, AvatarId::EMPTY);
        slots
    }

    /// Age of the account in whole days as of `now`.
    pub fn age_days(&self, now: u64) -> u32 {
        (now.saturating_sub(self.created_at) / 86_400) as u32
    }
}

// ---------------------------------------------------------------------------
// Avatar
// ---------------------------------------------------------------------------

/// A typed wish name awaiting or past moderation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishName {
    /// The requested name.
    pub name: String,
    /// Moderation outcome so far.
    pub review: NameReview,
}

/// A character record owned by exactly one account.
///
/// Created outside this core; the session core reads it for listings and
/// activation, and only ever unlinks it from the owning account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    /// The avatar's id.
    pub avatar_id: AvatarId,
    /// The owning account.
    pub account_id: AccountId,
    /// The granted (stock or approved) name.
    pub name: String,
    /// A typed name in or past moderation, if any.
    pub wish_name: Option<WishName>,
}

impl Avatar {
    /// Resolves the display name and review state for listings.
    ///
    /// An approved wish name replaces the granted name; a pending or
    /// rejected one keeps the granted name as the shown fallback.
    pub fn display_name(&self) -> (String, NameReview) {
        match &self.wish_name {
            None => (self.name.clone(), NameReview::Approved),
            Some(wish) => match wish.review {
                NameReview::Approved => (wish.name.clone(), NameReview::Approved),
                NameReview::Pending => (self.name.clone(), NameReview::Pending),
                NameReview::Rejected => (self.name.clone(), NameReview::Rejected),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Record envelope
// ---------------------------------------------------------------------------

/// What a record-store fetch hands back.
///
/// The store's id space is shared, so a fetch can surface a record of the
/// wrong kind (corruption, operator error). Callers match on the variant
/// and treat a mismatch as a data fault, never as a recoverable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// An account record.
    Account(Account),
    /// An avatar record.
    Avatar(Avatar),
}

impl Record {
    /// Short label for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Account(_) => "account",
            Record::Avatar(_) => "avatar",
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
