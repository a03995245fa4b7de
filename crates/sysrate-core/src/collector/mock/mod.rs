//! Test doubles for collectors: an in-memory filesystem with ready-made
//! scenarios, and a collector that replays scripted readings.

mod filesystem;
mod scenarios;
mod scripted;

pub use filesystem::MockFs;
pub use scripted::ScriptedCollector;
