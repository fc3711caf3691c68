pub mod actions;
pub mod class;
pub mod config;
pub mod predict;
pub mod velocity;
