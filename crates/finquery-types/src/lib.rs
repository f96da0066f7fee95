mod analysis;
mod event;

pub use analysis::*;
pub use event::*;
