pub mod handle;
pub mod lifecycle;
pub mod server;

pub use handle::*;
pub use lifecycle::*;
pub use server::*;
