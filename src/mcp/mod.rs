pub mod client;
pub mod protocol;
pub mod server;
pub mod stdio_transport;
pub mod transport;
