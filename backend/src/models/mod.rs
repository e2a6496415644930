//! Domain types shared by the store, the reconciler and the HTTP layer.

pub mod macros;
pub mod roster;
pub mod time;

pub use roster::*;
pub use time::*;
