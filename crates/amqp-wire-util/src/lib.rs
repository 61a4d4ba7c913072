mod arrayvec;
mod assert;
mod error;

pub use arrayvec::ArrayVec;
pub use error::{WireError, WireResult};
