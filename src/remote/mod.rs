//! Remote variant: the same executor behind a TCP socket.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{exec_remote_cmd_loop, Client};
pub use protocol::{Response, RDSH_EOF_CHAR};
pub use server::{serve_connection, ConnectionEnd, Server};
