// src/engine/mod.rs

pub mod batm;
pub mod clock;
pub mod config;
pub mod rating;
pub mod stage;
