// src/control/mod.rs

pub mod backend;
pub mod control_loop;
pub mod controller;
pub mod schedule;
