//! Application services layer.

pub mod compile;
pub mod dispatch;
pub mod entries;
pub mod error;
pub mod present;
