//! Request record: an immutable value built once per request and
//! handed down the middleware chain.

use crate::enums::{Method, Version};
use crate::headers::HeaderMap;

/// An immutable, fully-parsed request.
///
/// `stream_id` is `0` for HTTP/1.1 and the (odd, client-initiated)
/// HTTP/2 stream id otherwise; `version` lets middleware tell an
/// HTTP/1.0 request (no persistent connection by default, see
/// [`Version::defaults_to_close`]) apart from HTTP/1.1.
pub struct Request {
    method: Method,
    route: String,
    query_string: String,
    headers: HeaderMap,
    body: Vec<u8>,
    stream_id: u32,
    version: Version,
}

impl Request {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        route: String,
        query_string: String,
        headers: HeaderMap,
        body: Vec<u8>,
        stream_id: u32,
        version: Version,
    ) -> Request {
        Request {
            method,
            route,
            query_string,
            headers,
            body,
            stream_id,
            version,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_upgrade_request(&self, protocol: &str) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case(protocol))
            .unwrap_or(false)
    }
}
