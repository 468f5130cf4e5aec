// src/server/mod.rs

pub mod application;
pub mod context;
pub mod http;
pub mod initialization;
pub mod logbuffer;
pub mod spawner;
pub mod stream;

pub use application::{run, run_daemon};
