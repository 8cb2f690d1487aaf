//! Identity types shared by every layer of Gatehouse.
//!
//! Connections, accounts, and avatars are all addressed by opaque numeric
//! ids assigned elsewhere (the transport assigns connection ids, the record
//! store assigns account and avatar ids). Wrapping them in newtypes keeps
//! the three id spaces from being mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of avatar slots on every account. The slot list is a fixed-size
/// ordered array; empty slots hold [`AvatarId::EMPTY`].
pub const AVATAR_SLOTS: usize = 6;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for one live client link.
///
/// Assigned by the transport layer when the connection is accepted. The
/// session core never creates these — it only keys its maps on them.
///
/// `#[serde(transparent)]` makes this serialize as the bare number, so a
/// `ConnectionId(42)` is just `42` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A unique identifier for a persistent account record.
///
/// Assigned by the record store on account creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

/// A unique identifier for an avatar (character) record.
///
/// Id `0` is reserved as the empty-slot placeholder in the account's slot
/// array — the persisted shape stores zeros, not nulls. Use
/// [`AvatarId::is_empty`] rather than comparing against raw zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvatarId(pub u64);

impl AvatarId {
    /// The empty-slot placeholder.
    pub const EMPTY: AvatarId = AvatarId(0);

    /// Returns `true` if this is the empty-slot placeholder.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AvatarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// An addressable routing target on the message bus.
///
/// Connections, accounts, and avatars each get a channel. The numbering
/// convention packs the subject kind into the high bits so the three
/// ranges never collide:
///
/// ```text
/// account channel:  (1 << 40) | account_id
/// avatar channel:   (2 << 40) | avatar_id
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub u64);

/// High-bit tag for account channels.
const ACCOUNT_CHANNEL_BASE: u64 = 1 << 40;
/// High-bit tag for avatar channels.
const AVATAR_CHANNEL_BASE: u64 = 2 << 40;

impl Channel {
    /// The channel an account's traffic is routed on.
    pub fn for_account(account_id: AccountId) -> Channel {
        Channel(ACCOUNT_CHANNEL_BASE | account_id.0)
    }

    /// The channel an avatar's traffic is routed on.
    pub fn for_avatar(avatar_id: AvatarId) -> Channel {
        Channel(AVATAR_CHANNEL_BASE | avatar_id.0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Composite identity
// ---------------------------------------------------------------------------

/// The composite identity installed on a connection via
/// [`Directive::SetIdentity`](crate::Directive::SetIdentity).
///
/// Packs the account id into the high 32 bits and the active avatar id
/// (or 0 when no avatar is active) into the low 32 bits, matching the
/// message bus's sender-id convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeId {
    /// The account half. Always present once logged in.
    pub account_id: AccountId,
    /// The active avatar, if one is selected.
    pub avatar_id: Option<AvatarId>,
}

impl CompositeId {
    /// Identity for a logged-in connection with no avatar active.
    pub fn account_only(account_id: AccountId) -> CompositeId {
        CompositeId { account_id, avatar_id: None }
    }

    /// Identity for a connection with an active avatar.
    pub fn with_avatar(account_id: AccountId, avatar_id: AvatarId) -> CompositeId {
        CompositeId { account_id, avatar_id: Some(avatar_id) }
    }

    /// The packed `account << 32 | avatar` form used on the bus.
    pub fn packed(&self) -> u64 {
        let avatar = self.avatar_id.map_or(0, |v| v.0);
        (self.account_id.0 << 32) | (avatar & 0xFFFF_FFFF)
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.avatar_id {
            Some(avatar) => write!(f, "{}/{}", self.account_id, avatar),
            None => write!(f, "{}", self.account_id),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_serializes_as_plain_number() {
        // `#[serde(transparent)]` means ConnectionId(42) → `42`.
        let json = serde_json::to_string(&ConnectionId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "C-7");
    }

    #[test]
    fn test_account_id_display() {
        assert_eq!(AccountId(12).to_string(), "A-12");
    }

    #[test]
    fn test_avatar_id_zero_is_empty() {
        assert!(AvatarId::EMPTY.is_empty());
        assert!(AvatarId(0).is_empty());
        assert!(!AvatarId(5).is_empty());
    }

    #[test]
    fn test_channel_ranges_never_collide() {
        // An account and an avatar with the same raw id must map to
        // different channels.
        let a = Channel::for_account(AccountId(99));
        let v = Channel::for_avatar(AvatarId(99));
        assert_ne!(a, v);
    }

    #[test]
    fn test_composite_id_packs_account_high_avatar_low() {
        let id = CompositeId::with_avatar(AccountId(3), AvatarId(17));
        assert_eq!(id.packed(), (3 << 32) | 17);
    }

    #[test]
    fn test_composite_id_account_only_packs_zero_avatar() {
        let id = CompositeId::account_only(AccountId(3));
        assert_eq!(id.packed(), 3 << 32);
    }

    #[test]
    fn test_composite_id_display() {
        assert_eq!(
            CompositeId::with_avatar(AccountId(1), AvatarId(2)).to_string(),
            "A-1/V-2"
        );
        assert_eq!(CompositeId::account_only(AccountId(1)).to_string(), "A-1");
    }
}
