//! Taskboard server library.
//!
//! Exposes the sync hub, chat orchestrator, and supporting pieces for use
//! in tests and embedding. The server accepts WebSocket connections on
//! `/ws`, keeps every client's task list in sync, and streams assistant
//! responses over `POST /api/chat`.

pub mod chat;
pub mod config;
pub mod hub;
pub mod provider;
pub mod registry;
pub mod service;
pub mod store;
