//! Incremental HTTP/1.x request parser
//!
//! Bytes may arrive in any chunking. Header lines are collected byte by byte
//! up to CRLF; once the blank line after the headers is seen the body is
//! counted off by `Content-Length`. Bytes that follow a completed request in
//! the same chunk are kept and parsed on the next call.

use linkbridge_core::prelude::*;

/// Upper bound for one header line and for a request body
pub const RECV_CAPACITY: usize = 4096;

const MAX_METHOD_LEN: usize = 31;
const MAX_PATH_LEN: usize = 255;

/// A complete request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Major and minor protocol version
    pub version: (u8, u8),
    pub keep_alive: bool,
    pub content_length: usize,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
}

#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    line: Vec<u8>,
    request: Request,
    leftover: Vec<u8>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            line: Vec::with_capacity(RECV_CAPACITY),
            request: Request::default(),
            leftover: Vec::new(),
        }
    }

    /// Feed received bytes. Returns the first request they complete.
    ///
    /// An error means the connection cannot be used any more: the request
    /// line did not parse, a line overflowed the receive buffer, or the
    /// announced body does not fit.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<Request>> {
        let mut input = std::mem::take(&mut self.leftover);
        input.extend_from_slice(data);

        let mut pos = 0;
        while pos < input.len() {
            if self.state == ParseState::Body {
                let wanted = self.request.content_length - self.request.body.len();
                let take = wanted.min(input.len() - pos);
                self.request.body.extend_from_slice(&input[pos..pos + take]);
                pos += take;
                if self.request.body.len() == self.request.content_length {
                    self.leftover = input.split_off(pos);
                    return Ok(Some(self.finish()));
                }
                continue;
            }

            if self.line.len() >= RECV_CAPACITY - 1 {
                return Err(Error::protocol("request line exceeds receive buffer"));
            }
            self.line.push(input[pos]);
            pos += 1;

            if self.line.ends_with(b"\r\n") {
                self.line.truncate(self.line.len() - 2);
                let completed = self.process_line();
                self.line.clear();
                if let Some(request) = completed? {
                    self.leftover = input.split_off(pos);
                    return Ok(Some(request));
                }
            }
        }
        Ok(None)
    }

    fn process_line(&mut self) -> Result<Option<Request>> {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        match self.state {
            ParseState::RequestLine => {
                let (method, path, version) = parse_request_line(&line)?;
                debug!("method: {} path: {}", method, path);
                self.request.method = method;
                self.request.path = path;
                self.request.version = version;
                self.state = ParseState::Headers;
                Ok(None)
            }
            ParseState::Headers if line.is_empty() => {
                if self.request.content_length == 0 {
                    Ok(Some(self.finish()))
                } else {
                    self.state = ParseState::Body;
                    Ok(None)
                }
            }
            ParseState::Headers => {
                self.header(&line)?;
                Ok(None)
            }
            ParseState::Body => Ok(None),
        }
    }

    fn header(&mut self, line: &str) -> Result<()> {
        let Some((name, value)) = line.split_once(':') else {
            return Ok(());
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("Content-Length") {
            let length: usize = value
                .parse()
                .map_err(|_| Error::protocol(format!("bad Content-Length: {value:?}")))?;
            if length > RECV_CAPACITY {
                return Err(Error::protocol(format!("body of {length} bytes too large")));
            }
            self.request.content_length = length;
        } else if name.eq_ignore_ascii_case("Connection") {
            self.request.keep_alive = value.eq_ignore_ascii_case("keep-alive");
        }
        Ok(())
    }

    fn finish(&mut self) -> Request {
        self.state = ParseState::RequestLine;
        std::mem::take(&mut self.request)
    }
}

/// `METHOD PATH HTTP/major.minor`
fn parse_request_line(line: &str) -> Result<(String, String, (u8, u8))> {
    let invalid = || Error::protocol(format!("method error: {line:?}"));
    let mut parts = line.split_ascii_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    if method.len() > MAX_METHOD_LEN || path.len() > MAX_PATH_LEN {
        return Err(invalid());
    }

    let (major, minor) = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .ok_or_else(invalid)?;
    let major = major.parse().map_err(|_| invalid())?;
    let minor = minor.parse().map_err(|_| invalid())?;

    Ok((method.to_string(), path.to_string(), (major, minor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &[u8] = b"POST /config1.html HTTP/1.1\r\n\
        Host: 192.168.1.1\r\n\
        Content-Type: application/x-www-form-urlencoded\r\n\
        Content-Length: 13\r\n\
        \r\n\
        pwd=12345678&";

    #[test]
    fn test_get_without_body() {
        let mut parser = RequestParser::new();
        let request = parser
            .feed(b"GET /login.html HTTP/1.0\r\nHost: x\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/login.html");
        assert_eq!(request.version, (1, 0));
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let mut whole = RequestParser::new();
        let expected = whole.feed(POST).unwrap().unwrap();
        assert_eq!(expected.body, b"pwd=12345678&");

        let mut bytewise = RequestParser::new();
        let mut result = None;
        for (i, byte) in POST.iter().enumerate() {
            let out = bytewise.feed(std::slice::from_ref(byte)).unwrap();
            if i + 1 < POST.len() {
                assert!(out.is_none(), "completed early at byte {i}");
            }
            result = result.or(out);
        }
        assert_eq!(result, Some(expected.clone()));

        // Split right after the blank line and inside the body
        let split = POST.len() - 13;
        for cut in [split - 1, split, split + 4] {
            let mut parser = RequestParser::new();
            assert!(parser.feed(&POST[..cut]).unwrap().is_none());
            assert_eq!(parser.feed(&POST[cut..]).unwrap(), Some(expected.clone()));
        }
    }

    #[test]
    fn test_pipelined_bytes_are_kept() {
        let mut data = b"GET / HTTP/1.1\r\n\r\n".to_vec();
        data.extend_from_slice(POST);

        let mut parser = RequestParser::new();
        let first = parser.feed(&data).unwrap().unwrap();
        assert_eq!(first.path, "/");
        let second = parser.feed(&[]).unwrap().unwrap();
        assert_eq!(second.path, "/config1.html");
        assert_eq!(second.body, b"pwd=12345678&");
    }

    #[test]
    fn test_keep_alive_header() {
        let mut parser = RequestParser::new();
        let request = parser
            .feed(b"GET / HTTP/1.1\r\nconnection: Keep-Alive\r\n\r\n")
            .unwrap()
            .unwrap();
        assert!(request.keep_alive);
    }

    #[test]
    fn test_bad_request_line() {
        for line in [
            &b"HELLO\r\n"[..],
            b"GET /\r\n",
            b"GET / FTP/1.0\r\n",
            b"\r\n",
        ] {
            let mut parser = RequestParser::new();
            assert!(parser.feed(line).is_err(), "{:?}", String::from_utf8_lossy(line));
        }
    }

    #[test]
    fn test_overlong_line_rejected() {
        let mut parser = RequestParser::new();
        let mut data = b"GET /".to_vec();
        data.extend(std::iter::repeat(b'a').take(RECV_CAPACITY));
        assert!(parser.feed(&data).is_err());
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut parser = RequestParser::new();
        let err = parser
            .feed(b"POST /m.html HTTP/1.1\r\nContent-Length: 5000\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
