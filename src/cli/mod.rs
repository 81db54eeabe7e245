pub mod demo;
pub mod stats;
