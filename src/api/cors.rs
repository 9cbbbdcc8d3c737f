#![forbid(unsafe_code)]

use log::debug;
use poem::http::header::{self, HeaderMap};
use poem::http::{HeaderValue, Method, StatusCode};
use poem::{Endpoint, IntoResponse, Middleware, Request, Response, Result};

// ***************************************************************************
//                                Constants
// ***************************************************************************
const ALLOW_CREDENTIALS : &str = "true";
const ALLOW_HEADERS     : &str = "Content-Type, Authorization";
const ALLOW_METHODS     : &str = "GET, POST, PUT, DELETE, OPTIONS";
const EXPOSE_HEADERS    : &str = "Location, X-Request-Id";
const VARY_ON           : &str = "Origin";
const CONTENT_TYPE_JSON : &str = "application/json";
const PREFLIGHT_MAX_AGE : &str = "3600";

// ***************************************************************************
//                              CORS Middleware
// ***************************************************************************
/** Cross origin header filter applied to every route.
 *
 * Requests without a non-blank Origin header pass through untouched.  For
 * all others the caller's Origin is reflected back with credentials allowed
 * and a fixed method/header policy.  Preflight (OPTIONS) requests are
 * answered here with a 204 and never reach the downstream endpoint.
 *
 * Origins are not checked against an allowlist.
 */
pub struct CorsHeaders;

impl<E: Endpoint> Middleware<E> for CorsHeaders {
    type Output = CorsHeadersEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        CorsHeadersEndpoint { inner: ep }
    }
}

pub struct CorsHeadersEndpoint<E> {
    inner: E,
}

impl<E: Endpoint> Endpoint for CorsHeadersEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        // No usable origin means this isn't a cross origin request.
        let origin = match request_origin(&req) {
            Some(origin) => origin,
            None => return self.inner.call(req).await.map(IntoResponse::into_response),
        };

        // Answer preflight requests without consulting the route.
        if is_preflight(req.method()) {
            debug!("Preflight request for {} from origin {:?}.", req.uri(), origin);
            let mut resp = Response::builder().status(StatusCode::NO_CONTENT).finish();
            set_cors_headers(resp.headers_mut(), origin);
            resp.headers_mut().insert(header::ACCESS_CONTROL_MAX_AGE,
                                      HeaderValue::from_static(PREFLIGHT_MAX_AGE));
            return Ok(resp);
        }

        // The headers are part of the response even when the downstream
        // endpoint fails, so errors are rendered here.
        let mut resp = match self.inner.call(req).await {
            Ok(r) => r.into_response(),
            Err(e) => e.into_response(),
        };
        set_cors_headers(resp.headers_mut(), origin);
        Ok(resp)
    }
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// request_origin:
// ---------------------------------------------------------------------------
/** Return the first Origin header if it's non-blank.  The value is not
 * validated, it's reflected back exactly as received.
 */
fn request_origin(req: &Request) -> Option<HeaderValue> {
    req.headers()
        .get(header::ORIGIN)
        .filter(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace))
        .cloned()
}

// ---------------------------------------------------------------------------
// is_preflight:
// ---------------------------------------------------------------------------
fn is_preflight(method: &Method) -> bool {
    method.as_str().eq_ignore_ascii_case(Method::OPTIONS.as_str())
}

// ---------------------------------------------------------------------------
// set_cors_headers:
// ---------------------------------------------------------------------------
/** Set the cross origin headers.  A content type chosen by the downstream
 * endpoint takes precedence over the json default.
 */
fn set_cors_headers(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(header::VARY, HeaderValue::from_static(VARY_ON));
    headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static(ALLOW_CREDENTIALS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(EXPOSE_HEADERS));
    headers.entry(header::CONTENT_TYPE)
        .or_insert_with(|| HeaderValue::from_static(CONTENT_TYPE_JSON));
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use poem::http::Uri;
    use poem::test::TestClient;
    use poem::{get, handler, EndpointExt, Route};

    #[handler]
    fn reached() -> Response {
        Response::builder().body("reached")
    }

    #[handler]
    fn typed() -> &'static str {
        "plain"
    }

    fn app() -> impl Endpoint<Output = Response> {
        Route::new()
            .at("/api/hello", get(reached).post(reached))
            .at("/typed", get(typed))
            .with(CorsHeaders)
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let cli = TestClient::new(app());
        let resp = cli.options("/api/hello")
            .header("Origin", "http://example.com")
            .send()
            .await;
        resp.assert_status(StatusCode::NO_CONTENT);
        resp.assert_header("Access-Control-Allow-Origin", "http://example.com");
        resp.assert_header("Access-Control-Max-Age", "3600");
        resp.assert_header("Vary", "Origin");
        resp.assert_header("Access-Control-Allow-Credentials", "true");
        resp.assert_header("Access-Control-Allow-Headers", "Content-Type, Authorization");
        resp.assert_header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS");
        resp.assert_header("Access-Control-Expose-Headers", "Location, X-Request-Id");
        resp.assert_header("Content-Type", "application/json");
        resp.assert_text("").await;
    }

    #[tokio::test]
    async fn preflight_on_unrouted_path() {
        let cli = TestClient::new(app());
        let resp = cli.options("/no/such/path")
            .header("Origin", "https://app.example.org")
            .send()
            .await;
        resp.assert_status(StatusCode::NO_CONTENT);
        resp.assert_header("Access-Control-Allow-Origin", "https://app.example.org");
    }

    #[tokio::test]
    async fn lowercase_options_is_preflight() {
        let req = Request::builder()
            .method(Method::from_bytes(b"options").unwrap())
            .uri(Uri::from_static("/api/hello"))
            .header("Origin", "http://x.com")
            .finish();
        let resp = app().get_response(req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(resp.headers().get("access-control-max-age").unwrap(), "3600");
    }

    #[tokio::test]
    async fn get_with_origin_reaches_handler() {
        let cli = TestClient::new(app());
        let resp = cli.get("/api/hello")
            .header("Origin", "http://x.com")
            .send()
            .await;
        resp.assert_status_is_ok();
        resp.assert_header("Access-Control-Allow-Origin", "http://x.com");
        resp.assert_header("Content-Type", "application/json");
        resp.assert_header_is_not_exist("Access-Control-Max-Age");
        resp.assert_text("reached").await;
    }

    #[tokio::test]
    async fn no_origin_sets_nothing() {
        let cli = TestClient::new(app());
        let resp = cli.post("/api/hello").body("x").send().await;
        resp.assert_status_is_ok();
        resp.assert_header_is_not_exist("Access-Control-Allow-Origin");
        resp.assert_header_is_not_exist("Vary");
        resp.assert_header_is_not_exist("Content-Type");
        resp.assert_text("reached").await;
    }

    #[tokio::test]
    async fn blank_origin_is_ignored() {
        let cli = TestClient::new(app());
        let resp = cli.get("/api/hello").header("Origin", "").send().await;
        resp.assert_status_is_ok();
        resp.assert_header_is_not_exist("Access-Control-Allow-Origin");
        resp.assert_text("reached").await;
    }

    #[tokio::test]
    async fn options_without_origin_is_routed() {
        let cli = TestClient::new(app());
        let resp = cli.options("/api/hello").send().await;
        resp.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        resp.assert_header_is_not_exist("Access-Control-Allow-Origin");
    }

    #[tokio::test]
    async fn origin_is_reflected_unvalidated() {
        let cli = TestClient::new(app());
        let resp = cli.get("/api/hello")
            .header("Origin", "not a url")
            .send()
            .await;
        resp.assert_header("Access-Control-Allow-Origin", "not a url");
    }

    #[tokio::test]
    async fn downstream_content_type_wins() {
        let cli = TestClient::new(app());
        let resp = cli.get("/typed").header("Origin", "http://x.com").send().await;
        resp.assert_header("Content-Type", "text/plain; charset=utf-8");
        resp.assert_header("Access-Control-Allow-Origin", "http://x.com");
    }

    #[tokio::test]
    async fn unmapped_method_still_decorated() {
        let cli = TestClient::new(app());
        let resp = cli.put("/api/hello").header("Origin", "http://x.com").send().await;
        resp.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        resp.assert_header("Access-Control-Allow-Origin", "http://x.com");
    }
}
