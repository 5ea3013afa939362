//! Client library for the taskboard sync protocol.
//!
//! [`transport`] maintains a WebSocket connection to the server and
//! reconnects with exponential backoff when it drops. [`reconciler`] keeps
//! a local optimistic view of the task list and folds server broadcasts
//! into it. [`chat`] parses the SSE chat stream and accumulates a turn.

pub mod backoff;
pub mod chat;
pub mod reconciler;
pub mod transport;
