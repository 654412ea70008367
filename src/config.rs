use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Maximum number of commands in one pipeline.
pub const CMD_MAX: usize = 8;
/// Maximum length of an executable name, in bytes.
pub const EXE_MAX: usize = 64;
/// Maximum length of the argument text of one command, in bytes.
pub const ARG_MAX: usize = 256;
/// Maximum number of tokens (executable included) in one command.
pub const CMD_ARGV_MAX: usize = 8;

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_SERVER_INTERFACE: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_CLIENT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Size bounds applied while parsing a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_stages: usize,
    pub max_exe_len: usize,
    pub max_args_len: usize,
    pub max_argv: usize,
}

impl Limits {
    /// Bytes a command buffer reserves for its text.
    pub fn command_capacity(&self) -> usize {
        self.max_exe_len + self.max_args_len
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stages: CMD_MAX,
            max_exe_len: EXE_MAX,
            max_args_len: ARG_MAX,
            max_argv: CMD_ARGV_MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub interface: IpAddr,
    pub port: u16,
    /// Serve each connection on its own thread.
    pub threaded: bool,
    pub limits: Limits,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.interface, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_SERVER_INTERFACE,
            port: DEFAULT_PORT,
            threaded: false,
            limits: Limits::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: IpAddr,
    pub port: u16,
}

impl ClientConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CLIENT_ADDRESS,
            port: DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_stages, 8);
        assert_eq!(limits.command_capacity(), EXE_MAX + ARG_MAX);
    }

    #[test]
    fn test_default_addresses() {
        assert_eq!(ServerConfig::default().addr().to_string(), "0.0.0.0:1234");
        assert_eq!(ClientConfig::default().addr().to_string(), "127.0.0.1:1234");
    }
}
