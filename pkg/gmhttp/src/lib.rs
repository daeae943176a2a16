//! GM HTTP surface (component P, §4.P). The source binds parameters by
//! reflecting on a controller method's annotations at request time; per
//! the §9 redesign note ("Annotation-driven field binding") each
//! controller instead enumerates its `(path, method, description)` routes
//! explicitly and pulls whatever parameters it needs out of [`GmParams`]
//! itself, simple types from the query string and structured payloads from
//! the JSON body.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::errors::*;
use serde_json::Value;

/// A bound request: query parameters already split out, and the raw JSON
/// body (if any) available for complex payloads (§4.P "by convention:
/// simple types from query; complex types from JSON body").
pub struct GmParams {
    query: HashMap<String, String>,
    body: Option<Value>,
}

impl GmParams {
    pub fn new(query: HashMap<String, String>, body: Option<Value>) -> Self {
        Self { query, body }
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    pub fn query_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.query(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| format_err!("query parameter '{}' is not an integer", name)),
        }
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One handler bound to a concrete `(path, method)` pair under a
/// controller's prefix.
#[async_trait]
pub trait GmHandler: Send + Sync {
    async fn handle(&self, params: GmParams) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> GmHandler for F
where
    F: Fn(GmParams) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    async fn handle(&self, params: GmParams) -> Result<Value> {
        (self)(params).await
    }
}

pub struct RouteDef {
    pub path: &'static str,
    pub method: HttpMethod,
    pub description: &'static str,
    pub handler: Arc<dyn GmHandler>,
}

impl RouteDef {
    pub fn new(
        path: &'static str,
        method: HttpMethod,
        description: &'static str,
        handler: Arc<dyn GmHandler>,
    ) -> Self {
        Self { path, method, description, handler }
    }
}

/// A registered controller: a path prefix plus the routes it owns (§4.P
/// "Controllers declare a path prefix and each method declares (path,
/// http-method, description)").
pub trait GmController: Send + Sync {
    fn prefix(&self) -> &'static str;
    fn routes(&self) -> Vec<RouteDef>;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiDescriptor {
    pub path: String,
    pub method: &'static str,
    pub description: &'static str,
}

/// Uniform response envelope (§4.P, §7): `{code, message, data}`. `code`
/// 200 on success; on failure it's the error kind's HTTP-shaped status
/// code (§7 "HTTP endpoints emit the envelope with `code = taxonomy code`
/// and a non-nil message").
#[derive(Debug, Clone, serde::Serialize)]
pub struct Envelope {
    pub code: u16,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self { code: 200, message: "ok".to_string(), data }
    }

    pub fn error(err: &Error) -> Self {
        let kind = common::errors::kind_of(err);
        Self {
            code: kind.http_status(),
            message: err.to_string(),
            data: Value::Null,
        }
    }

}

struct CompiledRoute {
    full_path: String,
    method: HttpMethod,
    description: &'static str,
    handler: Arc<dyn GmHandler>,
}

/// Owns the full set of registered controllers and builds the `tide`
/// server that serves them, including the default `health` and `api-list`
/// endpoints every GM surface exposes (§4.P).
pub struct GmServer {
    routes: Vec<CompiledRoute>,
}

impl GmServer {
    pub fn new(controllers: Vec<Arc<dyn GmController>>) -> Self {
        let mut routes = Vec::new();
        for controller in &controllers {
            let prefix = controller.prefix().trim_end_matches('/');
            for route in controller.routes() {
                let full_path = format!("{}/{}", prefix, route.path.trim_start_matches('/'));
                routes.push(CompiledRoute {
                    full_path,
                    method: route.method,
                    description: route.description,
                    handler: route.handler,
                });
            }
        }
        Self { routes }
    }

    pub fn api_list(&self) -> Vec<ApiDescriptor> {
        self.routes
            .iter()
            .map(|r| ApiDescriptor {
                path: r.full_path.clone(),
                method: match r.method {
                    HttpMethod::Get => "GET",
                    HttpMethod::Post => "POST",
                },
                description: r.description,
            })
            .collect()
    }

    /// Builds the `tide::Server` but doesn't bind a socket; callers choose
    /// when/whether to `listen` (tests build the app and drive requests
    /// in-process instead).
    pub fn build_app(self: Arc<Self>) -> tide::Server<Arc<Self>> {
        let mut app = tide::with_state(self.clone());

        app.at("/health").get(|req: tide::Request<Arc<Self>>| async move {
            let _ = req;
            respond(Envelope::ok(serde_json::json!({"status": "up"})))
        });

        app.at("/api-list").get(|req: tide::Request<Arc<Self>>| async move {
            let list = req.state().api_list();
            respond(Envelope::ok(serde_json::to_value(list).unwrap_or(Value::Null)))
        });

        for (index, route) in self.routes.iter().enumerate() {
            let endpoint = move |req: tide::Request<Arc<Self>>| dispatch(req, index);
            match route.method {
                HttpMethod::Get => app.at(&route.full_path).get(endpoint),
                HttpMethod::Post => app.at(&route.full_path).post(endpoint),
            };
        }

        app
    }

    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<()> {
        log::info!("gm http surface listening on {}", addr);
        self.build_app()
            .listen(addr)
            .await
            .map_err(|e| format_err!("gm http listen failed: {}", e))
    }
}

async fn dispatch(mut req: tide::Request<Arc<GmServer>>, route_index: usize) -> tide::Result {
    let server = req.state().clone();
    let route = &server.routes[route_index];

    let mut query = HashMap::new();
    if let Ok(pairs) = req.query::<HashMap<String, String>>() {
        query = pairs;
    }
    let body = if route.method == HttpMethod::Post {
        req.body_json::<Value>().await.ok()
    } else {
        None
    };

    let result = route.handler.handle(GmParams::new(query, body)).await;
    let envelope = match result {
        Ok(data) => Envelope::ok(data),
        Err(err) => {
            log::warn!("gm handler for {} failed: {}", route.full_path, err);
            Envelope::error(&err)
        }
    };
    respond(envelope)
}

/// The transport status line is always 200: the envelope's own `code`
/// field is the channel callers branch on (§4.P "uniform envelope"), the
/// same way the RPC server always writes a RESPONSE frame and lets the
/// payload's success/error sum type carry the outcome.
fn respond(envelope: Envelope) -> tide::Result {
    let mut response = tide::Response::new(tide::StatusCode::Ok);
    response.set_body(tide::Body::from_json(&envelope)?);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingController;

    impl GmController for PingController {
        fn prefix(&self) -> &'static str {
            "/gm/ping"
        }

        fn routes(&self) -> Vec<RouteDef> {
            vec![RouteDef::new(
                "/echo",
                HttpMethod::Get,
                "echoes the `msg` query parameter",
                Arc::new(|params: GmParams| async move {
                    let msg = params.query("msg").unwrap_or("").to_string();
                    Ok(serde_json::json!({"echo": msg}))
                }),
            )]
        }
    }

    #[async_std::test]
    async fn api_list_enumerates_every_registered_route() {
        let server = Arc::new(GmServer::new(vec![Arc::new(PingController)]));
        let list = server.api_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path, "/gm/ping/echo");
        assert_eq!(list[0].method, "GET");
    }

    #[async_std::test]
    async fn envelope_reports_success_code_and_data() {
        let envelope = Envelope::ok(serde_json::json!({"a": 1}));
        assert_eq!(envelope.code, 200);
        assert_eq!(envelope.data["a"], 1);
    }

    #[async_std::test]
    async fn envelope_reports_business_kind_as_its_http_status() {
        let err: Error = common::TaggedError::new(common::ErrorKind::NotFound, "no such gm target").into();
        let envelope = Envelope::error(&err);
        assert_eq!(envelope.code, 404);
        assert!(!envelope.message.is_empty());
    }
}
