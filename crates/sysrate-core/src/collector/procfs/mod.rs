//! Collector for the Linux `/proc` and `/sys` filesystems.
//!
//! `parser` holds pure parsers for the individual files; `collector` turns
//! their output into named counters.

mod collector;
pub mod parser;

pub use collector::ProcfsCollector;
pub use parser::ParseError;
