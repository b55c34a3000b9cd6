//! Multilingual chat relay.
//!
//! Clients connect over plain TCP (telnet or netcat is enough), pick a nick
//! and a language, and every line they type is broadcast to the room,
//! translated into each listener's language on the way out.
//!
//! - [`cli`] and [`config`] turn the command line into [`config::RelaySettings`],
//!   including the translation provider credentials.
//! - [`relay`] accepts TCP connections and spawns one session per client.
//! - [`session`] runs the login prompts, then a read path feeding the hub and
//!   a write path draining the participant's mailbox.
//! - [`hub`] is the single task that owns membership and fans messages out,
//!   one translation lane per language in use.
//! - [`mailbox`] is the bounded, drop-oldest queue between hub and client.
//! - [`translate`] talks to the external translation provider.
//! - [`message`] holds the wire text and line helpers.

pub mod cli;
pub mod config;
pub mod hub;
pub mod mailbox;
pub mod message;
pub mod relay;
pub mod session;
pub mod translate;
