use crate::builtins::{EXIT_CMD, STOP_SERVER_CMD};
use crate::config::ClientConfig;
use crate::error::{Control, Outcome, ShellError, Warning};
use crate::prompt::Prompt;
use crate::remote::protocol::{is_disconnect, read_response, send_request, Response};
use crate::shell::read_input_line;
use std::io::{self, BufRead, ErrorKind, Write};
use std::net::TcpStream;
use tracing::info;

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub fn connect(config: &ClientConfig) -> Result<Self, ShellError> {
        let stream = TcpStream::connect(config.addr())?;
        info!(addr = %config.addr(), "client.connect");
        Ok(Self { stream })
    }

    /// Send one command and copy its response to `out`.
    ///
    /// Returns [`Response::Closed`] when the server had already hung up.
    pub fn request(&mut self, line: &str, out: &mut impl Write) -> Result<Response, ShellError> {
        match send_request(&mut self.stream, line) {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => return Ok(Response::Closed),
            Err(e) => return Err(e.into()),
        }
        read_response(&mut self.stream, out)
    }

    /// Send one command and collect its response.
    pub fn request_bytes(&mut self, line: &str) -> Result<Vec<u8>, ShellError> {
        let mut buf = Vec::new();
        match self.request(line, &mut buf)? {
            Response::Complete => Ok(buf),
            Response::Closed => Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "server closed the connection",
            )
            .into()),
        }
    }

    /// Whether the server has closed its side, checked without blocking.
    pub fn server_closed(&self) -> io::Result<bool> {
        self.stream.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let closed = match self.stream.peek(&mut byte) {
            Ok(n) => n == 0,
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) if is_disconnect(&e) => true,
            Err(e) => {
                let _ = self.stream.set_nonblocking(false);
                return Err(e);
            }
        };
        self.stream.set_nonblocking(false)?;
        Ok(closed)
    }
}

/// Interactive loop against a remote server.
///
/// Stops at end of input, after `exit` (closing this connection only), after
/// `stop-server`, or once the server hangs up, e.g. after `echo a | exit`.
pub fn exec_remote_cmd_loop<R: BufRead, W: Write>(
    config: &ClientConfig,
    prompt: &Prompt,
    mut input: R,
    mut out: W,
) -> Result<Outcome, ShellError> {
    let mut client = Client::connect(config)?;
    let mut buf = Vec::new();

    loop {
        if client.server_closed()? {
            info!("client.disconnected");
            return Ok(Outcome::Success);
        }

        write!(out, "{}", prompt.get_string())?;
        out.flush()?;

        let Some(cmd) = read_input_line(&mut input, &mut buf)? else {
            writeln!(out)?;
            return Ok(Outcome::Success);
        };
        if cmd.trim().is_empty() {
            if let Some(msg) = Outcome::Warning(Warning::NoCommands).message() {
                writeln!(out, "{}", msg)?;
            }
            continue;
        }

        if client.request(&cmd, &mut out)? == Response::Closed {
            writeln!(out)?;
            info!("client.disconnected");
            return Ok(Outcome::Success);
        }

        match cmd.trim() {
            EXIT_CMD => return Ok(Outcome::Control(Control::Exit)),
            STOP_SERVER_CMD => return Ok(Outcome::Control(Control::StopServer)),
            _ => {}
        }
    }
}
