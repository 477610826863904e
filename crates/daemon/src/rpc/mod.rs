// JSON-RPC server: method dispatch and root notifications over a Unix socket.

pub mod methods;
pub mod unix;
