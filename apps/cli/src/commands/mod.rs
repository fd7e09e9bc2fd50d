//! Command implementations for the Kiln CLI.

pub mod compare;
pub mod decode;
pub mod doctor;
pub mod envs;
pub mod history;
pub mod models;
pub mod render;
pub mod train;
