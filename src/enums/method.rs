use std::fmt;

/// HTTP request method.
///
/// The HTTP/1.1 request-line grammar only ever produces the seven
/// named variants; [`Method::Other`] exists so that HTTP/2 `:method`
/// pseudo-headers (which are not constrained by that grammar) and
/// forward-compatible callers still have somewhere to put an unusual
/// verb instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Other(String),
}

impl Method {
    /// The exact set of verbs the HTTP/1.1 request-line grammar accepts.
    pub const HTTP1_VERBS: [&'static str; 7] =
        ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

    /// Parse a method token as it appears on the wire (uppercase ASCII
    /// for the well-known verbs). Unlike [`Method::from`] this never
    /// falls back to `Other` for the seven known verbs case-sensitively.
    pub fn from_wire(s: &str) -> Method {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "PATCH" => Method::Patch,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }

    /// `true` for methods whose responses must never carry a body
    /// (HEAD), independent of status code.
    pub fn is_head(&self) -> bool {
        matches!(self, Method::Head)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other(s) => s,
        }
    }
}

impl<'a> From<&'a str> for Method {
    fn from(s: &'a str) -> Method {
        Method::from_wire(s)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
