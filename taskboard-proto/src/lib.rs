//! Shared protocol definitions for the Taskboard wire format.

pub mod chat;
pub mod message;
pub mod suggest;
