// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Containment checks for everything a model can point at.
//!
//! - [`PathGuard`] keeps file paths inside the sandbox root.
//! - [`validate_public_url`] and [`ensure_resolves_public`] keep outbound
//!   HTTP away from loopback and private networks. [`PublicResolver`] applies
//!   the same rule to every name the HTTP client looks up.

mod network;
mod path;

pub use network::{
    ensure_resolves_public, is_blocked_host, is_blocked_ip, public_addrs, validate_public_url,
    PublicResolver,
};
pub use path::{sanitize_requested_path, PathGuard};
