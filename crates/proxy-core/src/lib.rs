//! Core primitives shared by the OIDC proxy.
//!
//! Kept free of any HTTP or async dependency so the identity and routing
//! rules can be reasoned about (and tested) in isolation:
//!
//! - [`claims`]: turning provider-specific claim payloads into a canonical
//!   [`Identity`], and header-safe claim keys.
//! - [`prefix`]: longest-prefix selection with first-registered tie-break.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod prefix;

pub use claims::{
    ClaimNames, ClaimValue, Claims, Identity, merge_claims, normalize_groups, safe_header,
};
pub use prefix::longest_prefix;
