use std::fmt;

/// HTTP protocol version negotiated for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
    /// Only reachable via the HTTP/2 connection preface; never
    /// produced by the HTTP/1.1 request-line parser, since there is no
    /// plaintext upgrade path from HTTP/1.1 to HTTP/2 here.
    Http2,
}

impl Version {
    /// Requests at this version default to closing the connection
    /// after the response unless `Connection: keep-alive` says
    /// otherwise.
    pub fn defaults_to_close(self) -> bool {
        matches!(self, Version::Http10)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
            Version::Http2 => f.write_str("HTTP/2.0"),
        }
    }
}
