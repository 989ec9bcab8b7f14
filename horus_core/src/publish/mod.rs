//! Component B: object publisher and observer.
//!
//! Each published object carries a monotonically non-decreasing sequence
//! number. An [`Observer`] records the last consumed sequence number and
//! exposes [`Observer::is_update_needed`] as a volatile read. Substrate-
//! location-specific observation (following the `Contains` link to
//! republish a derived `SubstrateInfo`) lives in
//! [`crate::substrate::subst_loc_observer`], since it needs the substrate
//! projection types.

mod observer;
mod publisher;

pub use observer::Observer;
pub use publisher::Publisher;
