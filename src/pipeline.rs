//! Request pipeline: resolves a route, composes the registered
//! middleware chain, invokes the matched endpoint, and surfaces its
//! response.
//!
//! The `async fn` trait + `Next` recursion below follows the handler
//! pattern used across the modern async-Rust server ecosystem, built
//! around a list of middleware functions rather than a single codec.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::headers::HeaderArrayPool;
use crate::request::Request;
use crate::response::Response;
use crate::router::RouteTable;

/// Per-request context threaded through the middleware chain: the
/// parsed request, the `:name` bindings extracted by the route
/// matcher, and an opaque handle ("scope") middleware uses to resolve
/// per-request collaborators.
pub struct Context {
    pub request: Request,
    pub params: Vec<(String, String)>,
    pub header_pool: HeaderArrayPool,
    scope: Arc<dyn std::any::Any + Send + Sync>,
}

impl Context {
    pub fn new(
        request: Request,
        params: Vec<(String, String)>,
        header_pool: HeaderArrayPool,
        scope: Arc<dyn std::any::Any + Send + Sync>,
    ) -> Context {
        Context {
            request,
            params,
            header_pool,
            scope,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Resolve a per-request collaborator registered in the scope.
    pub fn scope<T: 'static>(&self) -> Option<&T> {
        self.scope.downcast_ref::<T>()
    }
}

/// A fully-resolved endpoint: the terminal step of the pipeline for
/// one route.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> Result<Response, Error>;
}

#[async_trait]
impl<F> Endpoint for F
where
    F: for<'a> Fn(&'a mut Context) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, Error>> + Send + 'a>>
        + Send
        + Sync,
{
    async fn call(&self, ctx: &mut Context) -> Result<Response, Error> {
        (self)(ctx).await
    }
}

/// One link in the middleware chain. Calls `next.run(ctx)` to continue
/// down the chain, or returns without calling it to short-circuit.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response, Error>;
}

/// The remaining suffix of the middleware chain plus the terminal
/// endpoint, recursively invoked one link at a time.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn run<'b>(
        self,
        ctx: &'b mut Context,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, Error>> + Send + 'b>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            match self.middleware.split_first() {
                Some((first, rest)) => {
                    let next = Next {
                        middleware: rest,
                        endpoint: self.endpoint,
                    };
                    first.call(ctx, next).await
                }
                None => self.endpoint.call(ctx).await,
            }
        })
    }
}

/// An endpoint registry keyed by the `<METHOD>_<pattern>` strings the
/// route table produces.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: std::collections::HashMap<String, Arc<dyn Endpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> EndpointRegistry {
        EndpointRegistry {
            endpoints: std::collections::HashMap::new(),
        }
    }

    pub fn insert(&mut self, endpoint_key: impl Into<String>, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.insert(endpoint_key.into(), endpoint);
    }

    pub fn get(&self, endpoint_key: &str) -> Option<&Arc<dyn Endpoint>> {
        self.endpoints.get(endpoint_key)
    }
}

/// Ties the route table, endpoint registry, and middleware chain
/// together into one dispatchable pipeline.
pub struct Pipeline {
    routes: RouteTable,
    endpoints: EndpointRegistry,
    middleware: Vec<Arc<dyn Middleware>>,
    /// Consulted before route resolution when the request path's final
    /// segment contains a `.` — an extension hook for static resources.
    static_resource_hook: Option<Arc<dyn Endpoint>>,
}

impl Pipeline {
    pub fn new(routes: RouteTable, endpoints: EndpointRegistry) -> Pipeline {
        Pipeline {
            routes,
            endpoints,
            middleware: Vec::new(),
            static_resource_hook: None,
        }
    }

    pub fn with_middleware(mut self, middleware: Vec<Arc<dyn Middleware>>) -> Pipeline {
        self.middleware = middleware;
        self
    }

    pub fn with_static_resource_hook(mut self, hook: Arc<dyn Endpoint>) -> Pipeline {
        self.static_resource_hook = Some(hook);
        self
    }

    fn has_dotted_final_segment(path: &str) -> bool {
        path.rsplit('/').next().unwrap_or("").contains('.')
    }

    /// Resolve a route and run the middleware chain down to the
    /// matched endpoint. `NotFound` surfaces as an error, same as any
    /// other pipeline failure — the caller turns it into a response.
    pub async fn dispatch(&self, mut ctx: Context) -> Result<Response, Error> {
        if let Some(hook) = &self.static_resource_hook {
            if Self::has_dotted_final_segment(ctx.request.route()) {
                return hook.call(&mut ctx).await;
            }
        }
        let (endpoint_key, params) = self
            .routes
            .find(ctx.request.method().as_str(), ctx.request.route())
            .map(|(key, params)| (key.to_string(), params))
            .ok_or(Error::NotFound)?;
        ctx.params = params;
        let endpoint = self.endpoints.get(&endpoint_key).ok_or(Error::NotFound)?.clone();
        let next = Next {
            middleware: &self.middleware,
            endpoint: endpoint.as_ref(),
        };
        next.run(&mut ctx).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::enums::{Method, Status, Version};
    use crate::headers::HeaderMap;

    fn make_request(route: &str) -> Request {
        let pool = HeaderArrayPool::new();
        Request::new(
            Method::Get,
            route.to_string(),
            String::new(),
            HeaderMap::new(&pool),
            Vec::new(),
            0,
            Version::Http11,
        )
    }

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, ctx: &mut Context) -> Result<Response, Error> {
            Ok(Response::new(Status::Ok, &ctx.header_pool))
        }
    }

    struct CountingMiddleware(Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait]
    impl Middleware for CountingMiddleware {
        async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Result<Response, Error> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn dispatches_to_matched_endpoint() {
        let mut routes = RouteTable::new();
        let key = routes.register("GET", "/users/:id");
        let mut endpoints = EndpointRegistry::new();
        endpoints.insert(key, Arc::new(Echo));
        let pipeline = Pipeline::new(routes, endpoints);

        let pool = HeaderArrayPool::new();
        let ctx = Context::new(make_request("/users/7"), Vec::new(), pool, Arc::new(()));
        let resp = pipeline.dispatch(ctx).await.unwrap();
        assert_eq!(resp.status(), &Status::Ok);
    }

    #[tokio::test]
    async fn unmatched_route_is_not_found() {
        let routes = RouteTable::new();
        let endpoints = EndpointRegistry::new();
        let pipeline = Pipeline::new(routes, endpoints);
        let pool = HeaderArrayPool::new();
        let ctx = Context::new(make_request("/missing"), Vec::new(), pool, Arc::new(()));
        let err = pipeline.dispatch(ctx).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn middleware_runs_before_endpoint() {
        let mut routes = RouteTable::new();
        let key = routes.register("GET", "/");
        let mut endpoints = EndpointRegistry::new();
        endpoints.insert(key, Arc::new(Echo));
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let pipeline = Pipeline::new(routes, endpoints)
            .with_middleware(vec![Arc::new(CountingMiddleware(counter.clone()))]);

        let pool = HeaderArrayPool::new();
        let ctx = Context::new(make_request("/"), Vec::new(), pool, Arc::new(()));
        pipeline.dispatch(ctx).await.unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
