//! Terminal front end for the Thinker's Workshop server.

pub mod config;
pub mod render;
