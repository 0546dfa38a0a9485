/// REST surface of the Parley messaging core.
///
/// Handlers stay thin: decode and validate at the boundary, run store
/// and crypto work under `spawn_blocking`, broadcast gateway events
/// after commit. Each handler returns a concrete response type so tests
/// can call it directly without standing up an HTTP server.
pub mod chat;
pub mod collab;
pub mod conversations;
pub mod error;
pub mod hydrate;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod state;

#[cfg(test)]
mod tests;
