pub mod frames;
pub mod methods;

pub use frames::{Frame, FrameType};
