//! External identity-provider boundary for Gatehouse.
//!
//! Under the external-OAuth scheme, a connection proves identity by
//! completing an authorization out-of-band (in a browser). What comes back
//! is a one-time code; this crate turns that code into a verified external
//! identity via two provider calls:
//!
//! 1. `POST /token` — exchange the code for an access token
//! 2. `GET /me` — fetch who the token belongs to
//!
//! The session core talks to the [`IdentityProvider`] trait, never to
//! reqwest directly, so tests substitute a scripted provider and the
//! whole OAuth flow runs without a network.

mod client;
mod error;
mod provider;

pub use client::HttpIdentityProvider;
pub use error::IdentityError;
pub use provider::{ExternalIdentity, IdentityProvider, ProviderConfig};
