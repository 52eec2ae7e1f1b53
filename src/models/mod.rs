pub mod activity;
pub mod lap;

pub use activity::Activity;
pub use lap::{ActivityDetail, AltitudeStream, Lap};
