pub mod backend;
pub mod buffer;
pub mod config;
pub mod correlator;
pub mod normalizer;
pub mod session;
pub mod writer;

pub use tabscope_common::error::SessionError;
pub use tabscope_common::protocol;
