//! Ports: seams the core depends on through traits.
//!
//! - `Clock` supplies timestamps.
//! - `IdGenerator` mints task and subscription ids.
//! - `Observer` receives state-change notifications.

pub mod clock;
pub mod id_generator;
pub mod observer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::observer::Observer;
