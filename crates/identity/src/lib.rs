//! Identity & binding services.
//!
//! Collapses platform accounts onto stable [`ChannelIdentity`] rows, holds
//! the one-shot preauth keys that link an identity to a user account, and
//! issues the short-lived JWTs scheduled jobs authenticate with.

pub mod identity;
pub mod preauth;
pub mod token;

pub use identity::{ChannelIdentity, IdentityStore};
pub use preauth::{PreauthKey, PreauthStore};
pub use token::{ScheduleClaims, ScheduleTokenIssuer};
