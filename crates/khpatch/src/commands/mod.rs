mod codec;
mod config;
mod hash;
mod info;
mod rebuild;

pub use codec::*;
pub use config::*;
pub use hash::*;
pub use info::*;
pub use rebuild::*;
