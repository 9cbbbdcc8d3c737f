#![forbid(unsafe_code)]

use poem::endpoint::BoxEndpoint;
use poem::{get, Endpoint, EndpointExt, Response, Route};
use poem_openapi::OpenApiService;

use crate::utils::config::Config;
use cors::CorsHeaders;
use version::VersionApi;

pub mod cors;
pub mod hello;
pub mod version;

// ***************************************************************************
//                                Constants
// ***************************************************************************
pub const HELLO_PATH : &str = "/api/hello";
const META_PATH      : &str = "/meta";
const DOCS_PATH      : &str = "/docs";
const SPEC_PATH      : &str = "/spec";
const SPEC_YAML_PATH : &str = "/spec_yaml";

// ***************************************************************************
//                               Route Table
// ***************************************************************************
// ---------------------------------------------------------------------------
// routes:
// ---------------------------------------------------------------------------
/** The application routes in registration order.  Each endpoint carries its
 * own verb dispatch table; unmapped verbs are answered with 405.
 */
pub fn routes() -> Vec<(&'static str, BoxEndpoint<'static, Response>)> {
    vec![
        (HELLO_PATH, get(hello::hello_get).post(hello::hello_post).boxed()),
    ]
}

// ---------------------------------------------------------------------------
// build_app:
// ---------------------------------------------------------------------------
/** Assemble the route table and the service metadata endpoints, then wrap
 * everything in the CORS filter.
 */
pub fn build_app(config: &Config, started: &str) -> impl Endpoint<Output = Response> {
    // The openapi service documents the metadata endpoints.
    let api_service = OpenApiService::new(VersionApi::new(started), config.title.as_str(),
                                          env!("CARGO_PKG_VERSION"))
        .server(config.server_url() + META_PATH);

    // Allow the generated openapi specs to be retrieved from the server.
    let spec = api_service.spec_endpoint();
    let spec_yaml = api_service.spec_endpoint_yaml();
    let ui = api_service.swagger_ui();

    routes()
        .into_iter()
        .fold(Route::new(), |route, (path, ep)| route.at(path, ep))
        .nest(META_PATH, api_service)
        .nest(DOCS_PATH, ui)
        .at(SPEC_PATH, spec)
        .at(SPEC_YAML_PATH, spec_yaml)
        .with(CorsHeaders)
        .data(config.echo_mode)
}
