//! Shared types for the bless application and its privileged helper.
//!
//! Both ends of the channel compile against this crate, so the helper identity
//! and the wire format are agreed upon at build time.
//!
//! # Main Types
//!
//! - [`ServiceDescriptor`] - Reverse-domain label plus supervisor domain
//! - [`Frame`] - Every message exchanged over the channel
//! - [`RemoteCall`] / [`RemoteResult`] - The three remote operations and their replies
//! - [`HelperEvent`] - Out-of-band events pushed by the helper

mod descriptor;
mod frame;

pub use descriptor::{DescriptorError, ServiceDescriptor, SupervisorDomain};
pub use frame::{Frame, HelperEvent, PROTOCOL_VERSION, RemoteCall, RemoteResult};
