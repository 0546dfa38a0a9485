/// Shared types for the Parley messaging core.
///
/// Domain enums and wire types live here so parley-db, parley-api and
/// parley-gateway agree on a single definition.
pub mod api;
pub mod events;
pub mod models;
