//! Small helpers shared across layers.

pub mod html;
pub mod lock;
