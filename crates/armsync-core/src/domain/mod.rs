//! Domain modules for the coordination core

pub mod health;
pub mod locking;
pub mod resources;
pub mod tasks;
pub mod threads;
