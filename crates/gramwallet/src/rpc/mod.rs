pub mod jsonrpc;
pub mod server;
pub mod ui;
