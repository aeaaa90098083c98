mod event;
mod license;
mod usage;

pub use event::*;
pub use license::*;
pub use usage::*;
