//! Keel controllers: concrete consumers of the engine.
//!
//! [`IpAccessListHandler`] plugs a resource kind into the generic state
//! reconciler. [`TokenReconciler`] refreshes service-account access tokens
//! by reconciling credential Secrets directly.

#![forbid(unsafe_code)]

pub mod ip_access_list;
pub mod token;

pub use ip_access_list::IpAccessListHandler;
pub use token::{TokenError, TokenReconciler, REFRESH_FLOOR};
