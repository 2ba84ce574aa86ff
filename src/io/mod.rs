// src/io/mod.rs

//! IO primitive layer.
//!
//! - [`primitive`] defines the [`IoPrimitive`] trait the cell drives
//!   (`submit` / `cancel` / `wait_ready`) and the [`Token`] it hands out.
//! - [`spawned`] provides [`SpawnedPrimitive`], which runs caller-supplied
//!   request futures on tokio, for callers that have no multiplexer of
//!   their own.

pub mod primitive;
pub mod spawned;

pub use primitive::{IoPrimitive, Ready, ReadyFuture, Token};
pub use spawned::{io_future, IoFuture, SpawnedPrimitive};
