pub mod bootstrap;
pub mod counters;
pub mod footer;
pub mod hooks;
pub mod resolver;

pub use footer::{BlockFooter, FOOTER_SIZE};
pub use hooks::Hooks;
