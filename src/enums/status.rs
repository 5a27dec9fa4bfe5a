/// Accessors shared by anything that can stand in for an HTTP status.
pub trait HttpStatus {
    fn code(&self) -> u16;
    fn reason(&self) -> &str;
}

/// An HTTP status code.
///
/// The well-known variants are the ones that get a precomputed
/// status line; [`Status::Raw`] covers everything else (the
/// serializer falls back to `write!("HTTP/1.1 {} {}\r\n", code, reason)`
/// for those).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Raw(u16, String),

    Continue,              // 100
    SwitchingProtocols,    // 101

    Ok,                    // 200
    Created,               // 201
    Accepted,              // 202
    NoContent,             // 204

    MovedPermanently,      // 301
    Found,                 // 302
    NotModified,           // 304

    BadRequest,            // 400
    Unauthorized,          // 401
    Forbidden,             // 403
    NotFound,              // 404
    MethodNotAllowed,      // 405
    RequestTimeout,        // 408
    LengthRequired,        // 411
    PayloadTooLarge,       // 413
    HeadersTooLarge,       // 431

    InternalServerError,   // 500
    NotImplemented,        // 501
    BadGateway,            // 502
    ServiceUnavailable,    // 503
}

impl Status {
    /// Construct a status from a raw numeric code, using a well-known
    /// variant when one exists so that the serializer can use its
    /// precomputed status line.
    pub fn from_code(code: u16, reason: impl Into<String>) -> Status {
        use Status::*;
        match code {
            100 => Continue,
            101 => SwitchingProtocols,
            200 => Ok,
            201 => Created,
            202 => Accepted,
            204 => NoContent,
            301 => MovedPermanently,
            302 => Found,
            304 => NotModified,
            400 => BadRequest,
            401 => Unauthorized,
            403 => Forbidden,
            404 => NotFound,
            405 => MethodNotAllowed,
            408 => RequestTimeout,
            411 => LengthRequired,
            413 => PayloadTooLarge,
            431 => HeadersTooLarge,
            500 => InternalServerError,
            501 => NotImplemented,
            502 => BadGateway,
            503 => ServiceUnavailable,
            other => Raw(other, reason.into()),
        }
    }

    /// Responses to this status never carry a body: 1xx, 204, 304.
    pub fn forbids_body(&self) -> bool {
        let code = self.code();
        (100..200).contains(&code) || code == 204 || code == 304
    }
}

impl HttpStatus for Status {
    fn code(&self) -> u16 {
        use Status::*;
        match self {
            Continue => 100,
            SwitchingProtocols => 101,
            Ok => 200,
            Created => 201,
            Accepted => 202,
            NoContent => 204,
            MovedPermanently => 301,
            Found => 302,
            NotModified => 304,
            BadRequest => 400,
            Unauthorized => 401,
            Forbidden => 403,
            NotFound => 404,
            MethodNotAllowed => 405,
            RequestTimeout => 408,
            LengthRequired => 411,
            PayloadTooLarge => 413,
            HeadersTooLarge => 431,
            InternalServerError => 500,
            NotImplemented => 501,
            BadGateway => 502,
            ServiceUnavailable => 503,
            Raw(code, _) => *code,
        }
    }

    fn reason(&self) -> &str {
        use Status::*;
        match self {
            Continue => "Continue",
            SwitchingProtocols => "Switching Protocols",
            Ok => "OK",
            Created => "Created",
            Accepted => "Accepted",
            NoContent => "No Content",
            MovedPermanently => "Moved Permanently",
            Found => "Found",
            NotModified => "Not Modified",
            BadRequest => "Bad Request",
            Unauthorized => "Unauthorized",
            Forbidden => "Forbidden",
            NotFound => "Not Found",
            MethodNotAllowed => "Method Not Allowed",
            RequestTimeout => "Request Timeout",
            LengthRequired => "Length Required",
            PayloadTooLarge => "Payload Too Large",
            HeadersTooLarge => "Request Header Fields Too Large",
            InternalServerError => "Internal Server Error",
            NotImplemented => "Not Implemented",
            BadGateway => "Bad Gateway",
            ServiceUnavailable => "Service Unavailable",
            Raw(_, reason) => reason,
        }
    }
}

/// Precomputed `"<code> <reason>\r\n"` tails for the well-known codes;
/// `None` means "format it at runtime".
pub fn precomputed_status_line(status: &Status) -> Option<&'static str> {
    use Status::*;
    Some(match status {
        Ok => "200 OK\r\n",
        Created => "201 Created\r\n",
        Accepted => "202 Accepted\r\n",
        NoContent => "204 No Content\r\n",
        MovedPermanently => "301 Moved Permanently\r\n",
        Found => "302 Found\r\n",
        NotModified => "304 Not Modified\r\n",
        BadRequest => "400 Bad Request\r\n",
        Unauthorized => "401 Unauthorized\r\n",
        Forbidden => "403 Forbidden\r\n",
        NotFound => "404 Not Found\r\n",
        MethodNotAllowed => "405 Method Not Allowed\r\n",
        InternalServerError => "500 Internal Server Error\r\n",
        BadGateway => "502 Bad Gateway\r\n",
        ServiceUnavailable => "503 Service Unavailable\r\n",
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_and_reason() {
        assert_eq!(Status::NotFound.code(), 404);
        assert_eq!(Status::NotFound.reason(), "Not Found");
    }

    #[test]
    fn raw_fallback() {
        let s = Status::from_code(418, "I'm a teapot");
        assert_eq!(s.code(), 418);
        assert_eq!(s.reason(), "I'm a teapot");
        assert!(precomputed_status_line(&s).is_none());
    }

    #[test]
    fn forbids_body() {
        assert!(Status::NoContent.forbids_body());
        assert!(Status::NotModified.forbids_body());
        assert!(Status::Continue.forbids_body());
        assert!(!Status::Ok.forbids_body());
    }
}
