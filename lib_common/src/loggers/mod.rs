/// Console and rotating file logging on top of `fern`.
pub mod loggerlocal;

pub use loggerlocal::{init, parse_level, LoggerError, LoggerLocalOptions};
