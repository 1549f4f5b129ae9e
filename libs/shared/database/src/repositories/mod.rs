pub mod booking;
pub mod notification;
pub mod schedule;
pub mod traits;

pub use traits::*;
