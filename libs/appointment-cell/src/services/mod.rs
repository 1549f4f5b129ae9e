pub mod booking;
pub mod locks;
