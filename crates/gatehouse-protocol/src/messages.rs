//! Inbound and outbound protocol messages.
//!
//! These are the framework-level messages exchanged between a connection
//! and the authority service during login and avatar selection. Gameplay
//! traffic never passes through here — once an avatar is active, the
//! session core is out of the picture.
//!
//! `#[serde(tag = "type")]` produces internally tagged JSON:
//!   `{ "type": "Login", "play_token": "alice" }`
//! which is what the client SDK expects.

use serde::{Deserialize, Serialize};

use crate::AvatarId;

// ---------------------------------------------------------------------------
// Authentication scheme
// ---------------------------------------------------------------------------

/// How the holder of a connection proves identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthScheme {
    /// The client supplies an opaque play token directly in `Login`.
    /// Development / trusted-gateway mode.
    DevToken,

    /// The client completes an out-of-band OAuth2-style authorization
    /// against an external provider; the service derives the play token
    /// from the provider identity.
    ExternalOauth,
}

// ---------------------------------------------------------------------------
// Avatar listing
// ---------------------------------------------------------------------------

/// Review state of an avatar's requested name.
///
/// Names chosen from the stock name pool are approved implicitly; typed
/// "wish names" go through moderation and sit in `Pending` until reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameReview {
    /// The shown name is final.
    Approved,
    /// A wish name is awaiting moderation; the shown name is provisional.
    Pending,
    /// The wish name was rejected; the shown name is the fallback.
    Rejected,
}

/// One avatar in an [`ServerMessage::AvatarList`] reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarEntry {
    /// The avatar's id.
    pub avatar_id: AvatarId,
    /// Which slot (0-based) the avatar occupies on the account.
    pub slot: u8,
    /// Display name, after wish-name resolution.
    pub name: String,
    /// Review state of that name.
    pub review: NameReview,
}

// ---------------------------------------------------------------------------
// Inbound messages (connection → service)
// ---------------------------------------------------------------------------

/// Requests a connection can make of the authority service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// "How do I log in?" Starts the authentication handshake.
    RequestAuthScheme,

    /// Direct-token login. Only valid under [`AuthScheme::DevToken`].
    Login { play_token: String },

    /// "Show me my avatars."
    RequestAvatarList,

    /// "Delete this avatar from my account."
    RequestRemoveAvatar { avatar_id: AvatarId },

    /// "Activate this avatar" — or, with `None`, "deactivate my current
    /// avatar."
    RequestPlayAvatar { avatar_id: Option<AvatarId> },
}

// ---------------------------------------------------------------------------
// Outbound messages (service → connection)
// ---------------------------------------------------------------------------

/// Replies the authority service sends to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Answer to `RequestAuthScheme`. Under `ExternalOauth` the
    /// `authorization_url` carries the provider URL (with the single-use
    /// session token embedded as the `state` parameter) for the holder to
    /// open out-of-band.
    SetAuthScheme {
        scheme: AuthScheme,
        session_token: String,
        authorization_url: Option<String>,
    },

    /// Login completed; the connection now owns its account channel.
    AcceptLogin,

    /// The compiled avatar list for the connection's account.
    AvatarList { entries: Vec<AvatarEntry> },

    /// Age of the account in days, sent during avatar activation.
    AccountDays { days: u32 },
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire format is consumed by a client SDK outside this workspace,
    //! so these tests pin the exact JSON shapes.

    use super::*;

    #[test]
    fn test_client_message_login_json_format() {
        let msg = ClientMessage::Login { play_token: "alice".into() };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Login");
        assert_eq!(json["play_token"], "alice");
    }

    #[test]
    fn test_client_message_request_auth_scheme_round_trip() {
        let msg = ClientMessage::RequestAuthScheme;
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ClientMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_client_message_play_avatar_none_is_deselect() {
        // `{"type":"RequestPlayAvatar","avatar_id":null}` must decode to
        // the deselect request.
        let json = r#"{"type":"RequestPlayAvatar","avatar_id":null}"#;
        let decoded: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            decoded,
            ClientMessage::RequestPlayAvatar { avatar_id: None }
        );
    }

    #[test]
    fn test_client_message_remove_avatar_round_trip() {
        let msg = ClientMessage::RequestRemoveAvatar {
            avatar_id: crate::AvatarId(7),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ClientMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_server_message_set_auth_scheme_json_format() {
        let msg = ServerMessage::SetAuthScheme {
            scheme: AuthScheme::ExternalOauth,
            session_token: "deadbeef".into(),
            authorization_url: Some("https://id.example/authorize".into()),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "SetAuthScheme");
        assert_eq!(json["scheme"], "ExternalOauth");
        assert_eq!(json["session_token"], "deadbeef");
        assert_eq!(json["authorization_url"], "https://id.example/authorize");
    }

    #[test]
    fn test_server_message_accept_login_round_trip() {
        let msg = ServerMessage::AcceptLogin;
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ServerMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_server_message_avatar_list_round_trip() {
        let msg = ServerMessage::AvatarList {
            entries: vec![AvatarEntry {
                avatar_id: crate::AvatarId(3),
                slot: 1,
                name: "Trixie".into(),
                review: NameReview::Pending,
            }],
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ServerMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_server_message_account_days_json_format() {
        let msg = ServerMessage::AccountDays { days: 41 };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "AccountDays");
        assert_eq!(json["days"], 41);
    }

    #[test]
    fn test_decode_unknown_client_message_returns_error() {
        let unknown = r#"{"type": "MakeMeAdmin"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(unknown);
        assert!(result.is_err());
    }
}
