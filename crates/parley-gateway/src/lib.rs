/// Realtime fan-out for the Parley messaging core.
///
/// One broadcast bus carries every gateway event; each WebSocket
/// connection filters against the set of conversations it subscribed
/// to (and was verified to participate in). Message events are id-only
/// so plaintext never crosses this transport.
pub mod connection;
pub mod dispatcher;
