//! A full request/response round trip through the pipeline, parser,
//! and serializer together, driving a single GET request end to end.

use std::sync::Arc;

use async_trait::async_trait;

use weft::headers::HeaderArrayPool;
use weft::http1::{self, Config as Http1Config};
use weft::pipe::{ReadPipe, WritePipe};
use weft::pipeline::{Context, Endpoint, EndpointRegistry, Pipeline};
use weft::pool::BufPool;
use weft::response::Content;
use weft::router::RouteTable;
use weft::serializer::Serializer;
use weft::{Error, Response, Status, Version};

struct Greet;

#[async_trait]
impl Endpoint for Greet {
    async fn call(&self, ctx: &mut Context) -> Result<Response, Error> {
        let name = ctx.param("name").unwrap_or("world").to_string();
        let mut resp = Response::new(Status::Ok, &ctx.header_pool);
        resp.set_content_type("text/plain");
        resp.set_content(Content::Fixed(format!("hello, {}", name).into_bytes()));
        Ok(resp)
    }
}

#[tokio::test]
async fn simple_get_request_round_trips_through_the_pipeline() {
    let mut routes = RouteTable::new();
    let key = routes.register("GET", "/greet/:name");
    let mut endpoints = EndpointRegistry::new();
    endpoints.insert(key, Arc::new(Greet));
    let pipeline = Pipeline::new(routes, endpoints);

    let wire = b"GET /greet/rustacean HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".to_vec();
    let mut read = ReadPipe::new(std::io::Cursor::new(wire));
    let mut write = WritePipe::new(Vec::new(), BufPool::new(), 4096);
    let header_pool = HeaderArrayPool::new();

    let parsed = http1::read_request(&mut read, &mut write, header_pool.clone(), &Http1Config::default())
        .await
        .unwrap();
    let version = parsed.request.version();
    let close = !parsed.keep_alive;

    let ctx = Context::new(parsed.request, Vec::new(), header_pool, Arc::new(()));
    let response = pipeline.dispatch(ctx).await.unwrap();

    let (status, headers, content, content_type, _content_encoding) = {
        let mut response = response;
        response.commit()
    };

    let mut serializer = Serializer::new(version, close);
    let mut buf = Vec::new();
    serializer.write_status(&mut buf, &status, false);
    if let Some(ct) = content_type {
        serializer.add_header(&mut buf, "Content-Type", &ct).unwrap();
    }
    for (name, value) in headers.iter() {
        serializer.add_header(&mut buf, name, value).unwrap();
    }
    let body = match content {
        Content::Fixed(bytes) => bytes,
        _ => panic!("expected a fixed-length body"),
    };
    serializer.add_length(&mut buf, body.len() as u64).unwrap();
    serializer.done_headers(&mut buf).unwrap();
    serializer.write_body(&mut buf, &body);
    serializer.done(&mut buf);

    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("hello, rustacean"));
    assert_eq!(status, Status::Ok);
    assert_eq!(version, Version::Http11);
}

#[tokio::test]
async fn unmatched_route_is_reported_as_not_found() {
    let routes = RouteTable::new();
    let endpoints = EndpointRegistry::new();
    let pipeline = Pipeline::new(routes, endpoints);

    let wire = b"GET /missing HTTP/1.1\r\n\r\n".to_vec();
    let mut read = ReadPipe::new(std::io::Cursor::new(wire));
    let mut write = WritePipe::new(Vec::new(), BufPool::new(), 4096);
    let header_pool = HeaderArrayPool::new();
    let parsed = http1::read_request(&mut read, &mut write, header_pool.clone(), &Http1Config::default())
        .await
        .unwrap();

    let ctx = Context::new(parsed.request, Vec::new(), header_pool, Arc::new(()));
    let err = pipeline.dispatch(ctx).await.unwrap_err();
    assert!(matches!(err, Error::NotFound));
}
