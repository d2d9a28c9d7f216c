//! Remote action/target shims: the client proxies calls to a capability
//! DON, the server answers them on behalf of a local capability.

pub mod client;
pub mod hasher;
pub mod server;

pub use client::{ExecutableClient, TransmissionConfig};
pub use hasher::{hasher_for, MessageHasher, SimpleHasher, WriteReportExcludeSignaturesHasher};
pub use server::{is_valid_message_id, ExecutableServer, REQUEST_EXPIRED_ERROR};
