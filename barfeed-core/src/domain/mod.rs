//! Domain types for barfeed

pub mod bar;
pub mod granularity;
pub mod window;

pub use bar::OhlcvBar;
pub use granularity::Granularity;
pub use window::WindowTime;
