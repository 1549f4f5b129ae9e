pub mod booking;
pub mod error;
pub mod notification;
pub mod schedule;

pub use booking::*;
pub use notification::*;
pub use schedule::*;
