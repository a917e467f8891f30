pub mod atf;
pub mod logging;

pub use atf::{AtfError, AtfReader, AtfResult};
