//! Framing shared by the remote server and client.
//!
//! A request is the command text followed by a NUL byte (a line feed is
//! accepted too). A response is any number of output bytes followed by
//! exactly one [`RDSH_EOF_CHAR`].

use crate::error::ShellError;
use std::io::{self, ErrorKind, Read, Write};

/// End-of-transmission marker closing every response.
pub const RDSH_EOF_CHAR: u8 = 0x04;
/// Size of one receive, and the largest request accepted.
pub const RDSH_COMM_BUFF_SZ: usize = 64 * 1024;

const REQUEST_TERMINATOR: u8 = 0;

/// Send one request in a single write.
pub fn send_request(w: &mut impl Write, line: &str) -> io::Result<()> {
    let mut msg = Vec::with_capacity(line.len() + 1);
    msg.extend_from_slice(line.as_bytes());
    msg.push(REQUEST_TERMINATOR);
    w.write_all(&msg)?;
    w.flush()
}

pub fn send_message_eof(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&[RDSH_EOF_CHAR])?;
    w.flush()
}

/// Send a full response: `msg` and the end marker.
pub fn send_message_string(w: &mut impl Write, msg: &str) -> io::Result<()> {
    w.write_all(msg.as_bytes())?;
    send_message_eof(w)
}

/// How reading a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// All output arrived, followed by the end marker.
    Complete,
    /// The server closed the connection before sending anything.
    Closed,
}

/// Copy one response to `out`, without its end marker.
///
/// Reads until a receive ends with the marker. A connection that closes
/// before the first byte is an orderly end; one that closes mid-response is
/// an error.
pub fn read_response(r: &mut impl Read, out: &mut impl Write) -> Result<Response, ShellError> {
    let mut buf = vec![0u8; RDSH_COMM_BUFF_SZ];
    let mut received = false;
    loop {
        let n = match r.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if !received && is_disconnect(&e) => return Ok(Response::Closed),
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            if !received {
                return Ok(Response::Closed);
            }
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "server closed the connection").into());
        }
        received = true;

        let chunk = &buf[..n];
        if chunk[n - 1] == RDSH_EOF_CHAR {
            out.write_all(&chunk[..n - 1])?;
            out.flush()?;
            return Ok(Response::Complete);
        }
        out.write_all(chunk)?;
    }
}

/// Errors meaning the peer has gone away.
pub fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

/// Splits the byte stream of a connection into requests.
pub struct RequestReader<R> {
    inner: R,
    pending: Vec<u8>,
    chunk: Vec<u8>,
}

impl<R: Read> RequestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            chunk: vec![0u8; RDSH_COMM_BUFF_SZ],
        }
    }

    /// Next request without its terminator, or `None` once the peer has
    /// closed the connection.
    pub fn next_request(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = self
                .pending
                .iter()
                .position(|&b| b == REQUEST_TERMINATOR || b == b'\n')
            {
                let rest = self.pending.split_off(pos + 1);
                let mut request = std::mem::replace(&mut self.pending, rest);
                request.pop();
                return Ok(Some(decode(&request)));
            }

            let n = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                // an unterminated request still counts
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let request = std::mem::take(&mut self.pending);
                return Ok(Some(decode(&request)));
            }

            self.pending.extend_from_slice(&self.chunk[..n]);
            if self.pending.len() > RDSH_COMM_BUFF_SZ {
                return Err(io::Error::new(ErrorKind::InvalidData, "request too large"));
            }
        }
    }
}

fn decode(request: &[u8]) -> String {
    String::from_utf8_lossy(request)
        .trim_end_matches('\r')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_requests_split_on_nul_and_newline() {
        let mut reader = RequestReader::new(Cursor::new(b"ls -l\0echo hi\r\npwd".to_vec()));
        assert_eq!(reader.next_request().unwrap().as_deref(), Some("ls -l"));
        assert_eq!(reader.next_request().unwrap().as_deref(), Some("echo hi"));
        assert_eq!(reader.next_request().unwrap().as_deref(), Some("pwd"));
        assert_eq!(reader.next_request().unwrap(), None);
    }

    #[test]
    fn test_closed_connection() {
        let mut reader = RequestReader::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(reader.next_request().unwrap(), None);
    }

    #[test]
    fn test_oversized_request() {
        let data = vec![b'a'; RDSH_COMM_BUFF_SZ * 2];
        let mut reader = RequestReader::new(Cursor::new(data));
        let err = reader.next_request().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_send_request_is_nul_terminated() {
        let mut wire = Vec::<u8>::new();
        send_request(&mut wire, "echo hi").unwrap();
        assert_eq!(wire, b"echo hi\0");
    }

    #[test]
    fn test_response_strips_marker() {
        let mut wire = Vec::<u8>::new();
        send_message_string(&mut wire, "hello\n").unwrap();
        assert_eq!(wire.iter().filter(|&&b| b == RDSH_EOF_CHAR).count(), 1);

        let mut out = Vec::<u8>::new();
        assert_eq!(
            read_response(&mut Cursor::new(wire), &mut out).unwrap(),
            Response::Complete
        );
        assert_eq!(out, b"hello\n");
    }

    #[test]
    fn test_close_before_response_is_orderly() {
        let mut out = Vec::<u8>::new();
        assert_eq!(
            read_response(&mut Cursor::new(Vec::<u8>::new()), &mut out).unwrap(),
            Response::Closed
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_response_without_marker_is_an_error() {
        let mut out = Vec::<u8>::new();
        let err = read_response(&mut Cursor::new(b"partial".to_vec()), &mut out).unwrap_err();
        assert!(matches!(err, ShellError::Communication(_)));
        assert_eq!(out, b"partial");
    }
}
