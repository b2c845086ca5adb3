//! PC/SC context and reader management
//!
//! Owns the tables of live contexts and card handles, maps reader names to
//! USB devices, and implements the PC/SC call semantics on top of the USB
//! device proxy.

pub mod manager;
pub mod readers;

pub use manager::{CardHandle, ContextHandle, Disposition, ScardManager};
