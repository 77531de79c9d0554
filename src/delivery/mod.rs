//! Delivery-history store (spec §4.5): the authoritative record of what has
//! already been uploaded, keyed by hash and by URL.

pub mod store;

pub use store::{DeliveryStore, StoreError};
