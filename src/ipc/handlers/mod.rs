pub mod core;
pub mod options;
pub mod records;
pub mod screens;
pub mod setup;
