//! Response record: mutable until the first byte is committed to the
//! wire, at which point the serializer takes ownership of its
//! headers.

use crate::enums::Status;
use crate::error::Error;
use crate::headers::HeaderMap;

/// The body a response will send, with a length that is either known
/// up front (fixed `Content-Length`) or not (chunked transfer-coding).
pub enum Content {
    /// A complete, already-in-memory body of known length.
    Fixed(Vec<u8>),
    /// A body whose length isn't known ahead of time; serialized with
    /// `Transfer-Encoding: chunked`.
    Streamed(Box<dyn FnMut() -> Option<Vec<u8>> + Send>),
    /// No body at all.
    Empty,
}

impl Content {
    pub fn known_length(&self) -> Option<usize> {
        match self {
            Content::Fixed(bytes) => Some(bytes.len()),
            Content::Streamed(_) => None,
            Content::Empty => Some(0),
        }
    }
}

/// A response under construction. Every setter is infallible except
/// header mutation, which rejects control-byte injection.
///
/// Invariant: `status` must be set (via [`Response::new`]) before any
/// header is added. After [`Response::commit`] no further mutation is
/// permitted; violating that is a caller bug and panics, matching the
/// serializer's own misuse-panics philosophy.
pub struct Response {
    status: Status,
    headers: HeaderMap,
    content: Content,
    content_type: Option<String>,
    content_encoding: Option<String>,
    last_modified: Option<String>,
    expires: Option<String>,
    committed: bool,
}

impl Response {
    pub fn new(status: Status, header_pool: &crate::headers::HeaderArrayPool) -> Response {
        Response {
            status,
            headers: HeaderMap::new(header_pool),
            content: Content::Empty,
            content_type: None,
            content_encoding: None,
            last_modified: None,
            expires: None,
            committed: false,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.assert_not_committed();
        self.status = status;
    }

    /// Add a header, rejecting values containing `\r`, `\n`, or NUL.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.assert_not_committed();
        validate_header_value(name, value)?;
        self.headers
            .set(name, value)
            .map_err(|()| Error::HeadersTooLarge)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_content(&mut self, content: Content) {
        self.assert_not_committed();
        self.content = content;
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn set_content_type(&mut self, value: impl Into<String>) {
        self.assert_not_committed();
        self.content_type = Some(value.into());
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_encoding(&mut self, value: impl Into<String>) {
        self.assert_not_committed();
        self.content_encoding = Some(value.into());
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn set_last_modified(&mut self, value: impl Into<String>) {
        self.assert_not_committed();
        self.last_modified = Some(value.into());
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    pub fn set_expires(&mut self, value: impl Into<String>) {
        self.assert_not_committed();
        self.expires = Some(value.into());
    }

    pub fn expires(&self) -> Option<&str> {
        self.expires.as_deref()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    fn assert_not_committed(&self) {
        assert!(
            !self.committed,
            "response mutated after commit; serializer already owns its headers"
        );
    }

    /// Mark the response committed and hand its pieces to the caller
    /// (the serializer), which takes ownership of the header map. The
    /// status stays put (the serializer needs it to build the status
    /// line); the header map and content are taken, leaving placeholder
    /// values that subsequent mutators will refuse to touch.
    pub fn commit(&mut self) -> (Status, HeaderMap, Content, Option<String>, Option<String>) {
        self.assert_not_committed();
        self.committed = true;
        (
            self.status.clone(),
            std::mem::replace(&mut self.headers, HeaderMap::new(&self.headers.pool_handle())),
            std::mem::replace(&mut self.content, Content::Empty),
            self.content_type.take(),
            self.content_encoding.take(),
        )
    }
}

fn validate_header_value(name: &str, value: &str) -> Result<(), Error> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(Error::HeaderInjection(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::headers::HeaderArrayPool;

    #[test]
    fn rejects_header_injection() {
        let pool = HeaderArrayPool::new();
        let mut resp = Response::new(Status::Ok, &pool);
        let err = resp.add_header("X-Evil", "a\r\nSet-Cookie: pwned=1").unwrap_err();
        assert!(matches!(err, Error::HeaderInjection(_)));
    }

    #[test]
    #[should_panic]
    fn mutation_after_commit_panics() {
        let pool = HeaderArrayPool::new();
        let mut resp = Response::new(Status::Ok, &pool);
        resp.add_header("X-A", "1").unwrap();
        let _ = resp.commit();
        resp.add_header("X-B", "2").unwrap();
    }

    #[test]
    fn fixed_content_reports_known_length() {
        let content = Content::Fixed(b"hello".to_vec());
        assert_eq!(content.known_length(), Some(5));
        assert_eq!(Content::Empty.known_length(), Some(0));
    }
}
