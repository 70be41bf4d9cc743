pub mod copy;
pub mod error;
pub mod glob;
pub mod runner;

pub use copy::*;
pub use error::*;
pub use glob::*;
pub use runner::*;
