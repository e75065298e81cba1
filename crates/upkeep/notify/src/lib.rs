//! Upkeep Notify - who hears about a transition, and how
//!
//! Split in two halves that never mix concerns:
//! - [`targeting`]: pure rules mapping an event and its request to the set
//!   of recipients. No I/O, deterministic, fully unit-testable.
//! - [`dispatch`]: best-effort fan-out of a payload to those recipients
//!   through an opaque [`Notifier`]. Fire-and-forget, never on the critical
//!   path of the transition that triggered it.

#![deny(unsafe_code)]

mod dispatch;
mod targeting;

pub use dispatch::{DeliveryError, DispatchConfig, Dispatcher, Notifier};
pub use targeting::{payload_for, targets, NotificationPayload, RequestEvent};
