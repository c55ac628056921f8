//! Run event distribution.

mod bus;

pub use bus::EventBus;
