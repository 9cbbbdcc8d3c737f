#![forbid(unsafe_code)]

use poem::web::{Data, Query};
use poem::{handler, Request, Response};

use crate::utils::config::EchoMode;
use crate::utils::hello_utils::{self, RequestDebug};

// ***************************************************************************
//                                Constants
// ***************************************************************************
/// Substituted when the name parameter is missing or blank.
pub const DEFAULT_NAME: &str = "world !!!";

const NAME_PARM: &str = "name";
const EMPTY_ECHO: &str = "\"\"";

// ***************************************************************************
//                          Request Definitions
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreetingRequest:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct GreetingRequest
{
    name: Option<String>,
}

impl GreetingRequest {
    /** Take the first name parameter from the decoded query pairs. */
    pub fn from_query_pairs(pairs: Vec<(String, String)>) -> Self {
        let name = pairs.into_iter()
            .find(|(key, _)| key == NAME_PARM)
            .map(|(_, value)| value);
        Self { name }
    }

    /** The name to greet, falling back to the default for absent or blank names. */
    pub fn resolved_name(&self) -> &str {
        match &self.name {
            Some(name) if !hello_utils::is_blank(name) => name,
            _ => DEFAULT_NAME,
        }
    }
}

impl RequestDebug for GreetingRequest {
    type Req = GreetingRequest;
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(64);
        s.push_str("  Request parameters:");
        s.push_str("\n    name: ");
        s.push_str(&format!("{:?}", self.name));
        s
    }
}

// ---------------------------------------------------------------------------
// EchoRequest:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct EchoRequest
{
    body: String,
}

impl EchoRequest {
    /** Decode the raw body and join its lines with no separator.  Invalid
     * UTF-8 sequences are replaced rather than rejected.
     */
    pub fn from_bytes(raw: &[u8]) -> Self {
        let body = String::from_utf8_lossy(raw)
            .chars()
            .filter(|c| *c != '\n' && *c != '\r')
            .collect();
        Self { body }
    }

    pub fn is_blank(&self) -> bool {
        hello_utils::is_blank(&self.body)
    }
}

impl RequestDebug for EchoRequest {
    type Req = EchoRequest;
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(64 + self.body.len());
        s.push_str("  Request body:\n    ");
        s.push_str(&self.body);
        s
    }
}

// ***************************************************************************
//                               Endpoints
// ***************************************************************************
// ---------------------------------------------------------------------------
// hello_get:
// ---------------------------------------------------------------------------
#[handler]
pub fn hello_get(http_req: &Request, Query(pairs): Query<Vec<(String, String)>>) -> Response {
    let req = GreetingRequest::from_query_pairs(pairs);
    hello_utils::debug_request(http_req, &req);
    Response::builder().body(greeting_json(&req))
}

// ---------------------------------------------------------------------------
// hello_post:
// ---------------------------------------------------------------------------
#[handler]
pub fn hello_post(http_req: &Request, body: Vec<u8>, Data(mode): Data<&EchoMode>) -> Response {
    let req = EchoRequest::from_bytes(&body);
    hello_utils::debug_request(http_req, &req);
    Response::builder().body(echo_json(&req, *mode))
}

// ***************************************************************************
//                            Response Builders
// ***************************************************************************
// ---------------------------------------------------------------------------
// greeting_json:
// ---------------------------------------------------------------------------
/** Build `{"message":"Hello, <name>"}` by concatenation.  Only double quotes
 * in the name are escaped; backslashes and control characters pass through.
 */
pub fn greeting_json(req: &GreetingRequest) -> String {
    let safe = req.resolved_name().replace('"', "\\\"");
    "{\"message\":\"Hello, ".to_owned() + &safe + "\"}"
}

// ---------------------------------------------------------------------------
// echo_json:
// ---------------------------------------------------------------------------
/** Build `{"received":<body>}`.  A blank body is always echoed as an empty
 * JSON string; otherwise the echo mode decides how the body is placed.
 */
pub fn echo_json(req: &EchoRequest, mode: EchoMode) -> String {
    let received = if req.is_blank() {
        EMPTY_ECHO.to_string()
    } else {
        match mode {
            EchoMode::Verbatim => req.body.clone(),
            EchoMode::Hardened => harden(&req.body),
        }
    };
    "{\"received\":".to_owned() + &received + "}"
}

// ---------------------------------------------------------------------------
// harden:
// ---------------------------------------------------------------------------
fn harden(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(_) => body.to_string(),
        Err(_) => serde_json::Value::String(body.to_string()).to_string(),
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use poem::test::TestClient;
    use poem::{get, Endpoint, EndpointExt, Route};

    fn greeting(name: Option<&str>) -> String {
        let pairs = name.map(|n| vec![(NAME_PARM.to_string(), n.to_string())]).unwrap_or_default();
        greeting_json(&GreetingRequest::from_query_pairs(pairs))
    }

    fn echo(body: &str, mode: EchoMode) -> String {
        echo_json(&EchoRequest::from_bytes(body.as_bytes()), mode)
    }

    fn app(mode: EchoMode) -> impl Endpoint {
        Route::new()
            .at("/api/hello", get(hello_get).post(hello_post))
            .data(mode)
    }

    #[test]
    fn greets_by_name() {
        assert_eq!(greeting(Some("Alice")), r#"{"message":"Hello, Alice"}"#);
        assert_eq!(greeting(Some("  padded ")), r#"{"message":"Hello,   padded "}"#);
    }

    #[test]
    fn missing_or_blank_name_uses_default() {
        let expected = r#"{"message":"Hello, world !!!"}"#;
        assert_eq!(greeting(None), expected);
        assert_eq!(greeting(Some("")), expected);
        assert_eq!(greeting(Some("   \t ")), expected);
    }

    #[test]
    fn quotes_are_escaped_once() {
        assert_eq!(greeting(Some(r#"say "hi""#)), r#"{"message":"Hello, say \"hi\""}"#);
        // An already escaped quote gains another backslash; backslashes are left alone.
        assert_eq!(greeting(Some(r#"a\"b"#)), r#"{"message":"Hello, a\\"b"}"#);
        assert_eq!(greeting(Some("tab\there")), "{\"message\":\"Hello, tab\there\"}");
    }

    #[test]
    fn whitespace_only_names() {
        let expected = r#"{"message":"Hello, world !!!"}"#;
        assert_eq!(greeting(Some("\u{3000}\u{2028}")), expected);
        assert_eq!(greeting(Some("\u{1F}")), expected);

        // Non-breaking spaces are greeted as given.
        assert_eq!(greeting(Some("\u{A0}")), "{\"message\":\"Hello, \u{A0}\"}");
        assert_eq!(greeting(Some("\u{202F}")), "{\"message\":\"Hello, \u{202F}\"}");
    }

    #[test]
    fn first_name_parameter_wins() {
        let pairs = vec![
            ("other".to_string(), "x".to_string()),
            ("name".to_string(), "first".to_string()),
            ("name".to_string(), "second".to_string()),
        ];
        let req = GreetingRequest::from_query_pairs(pairs);
        assert_eq!(req.resolved_name(), "first");
    }

    #[test]
    fn blank_body_echoes_empty_string() {
        assert_eq!(echo("", EchoMode::Verbatim), r#"{"received":""}"#);
        assert_eq!(echo(" \n\r\n  ", EchoMode::Verbatim), r#"{"received":""}"#);
        assert_eq!(echo("", EchoMode::Hardened), r#"{"received":""}"#);
    }

    #[test]
    fn whitespace_only_bodies() {
        assert_eq!(echo("\u{1C}\u{1F}\n", EchoMode::Verbatim), r#"{"received":""}"#);
        assert_eq!(echo("\u{A0}", EchoMode::Verbatim), "{\"received\":\u{A0}}");
        assert_eq!(echo("\u{A0}", EchoMode::Hardened), "{\"received\":\"\u{A0}\"}");
    }

    #[test]
    fn verbatim_splices_body() {
        assert_eq!(echo(r#"{"a":1}"#, EchoMode::Verbatim), r#"{"received":{"a":1}}"#);
        assert_eq!(echo("not json", EchoMode::Verbatim), r#"{"received":not json}"#);
    }

    #[test]
    fn lines_are_joined_without_separator() {
        assert_eq!(echo("line1\nline2", EchoMode::Verbatim), r#"{"received":line1line2}"#);
        assert_eq!(echo("line1\r\nline2\rline3\n", EchoMode::Verbatim),
                   r#"{"received":line1line2line3}"#);
        assert_eq!(echo("{\n  \"a\": 1\n}", EchoMode::Verbatim), r#"{"received":{  "a": 1}}"#);
    }

    #[test]
    fn hardened_quotes_non_json() {
        assert_eq!(echo(r#"{"a":1}"#, EchoMode::Hardened), r#"{"received":{"a":1}}"#);
        assert_eq!(echo("not json", EchoMode::Hardened), r#"{"received":"not json"}"#);
        assert_eq!(echo(r#"say "hi""#, EchoMode::Hardened), r#"{"received":"say \"hi\""}"#);

        let out = echo("line1\nline2", EchoMode::Hardened);
        assert!(serde_json::from_str::<serde_json::Value>(&out).is_ok());
        assert_eq!(out, r#"{"received":"line1line2"}"#);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let req = EchoRequest::from_bytes(&[b'o', b'k', 0xff]);
        assert_eq!(echo_json(&req, EchoMode::Verbatim), "{\"received\":ok\u{FFFD}}");
    }

    #[tokio::test]
    async fn get_endpoint() {
        let cli = TestClient::new(app(EchoMode::Verbatim));

        let resp = cli.get("/api/hello").send().await;
        resp.assert_status_is_ok();
        resp.assert_header_is_not_exist("Content-Type");
        resp.assert_text(r#"{"message":"Hello, world !!!"}"#).await;

        let resp = cli.get("/api/hello?name=Bob").send().await;
        resp.assert_text(r#"{"message":"Hello, Bob"}"#).await;

        let resp = cli.get("/api/hello?name=Say%20%22hi%22").send().await;
        resp.assert_text(r#"{"message":"Hello, Say \"hi\""}"#).await;

        let resp = cli.get("/api/hello?name=++").send().await;
        resp.assert_text(r#"{"message":"Hello, world !!!"}"#).await;

        let resp = cli.get("/api/hello?name=").send().await;
        resp.assert_text(r#"{"message":"Hello, world !!!"}"#).await;

        let resp = cli.get("/api/hello?name=%C2%A0").send().await;
        resp.assert_text("{\"message\":\"Hello, \u{A0}\"}").await;
    }

    #[tokio::test]
    async fn post_endpoint() {
        let cli = TestClient::new(app(EchoMode::Verbatim));

        let resp = cli.post("/api/hello").body(r#"{"a":1}"#).send().await;
        resp.assert_status_is_ok();
        resp.assert_text(r#"{"received":{"a":1}}"#).await;

        let resp = cli.post("/api/hello")
            .header("Content-Type", "application/json")
            .body("line1\nline2")
            .send()
            .await;
        resp.assert_text(r#"{"received":line1line2}"#).await;

        let resp = cli.post("/api/hello").send().await;
        resp.assert_status_is_ok();
        resp.assert_text(r#"{"received":""}"#).await;
    }

    #[tokio::test]
    async fn post_endpoint_hardened() {
        let cli = TestClient::new(app(EchoMode::Hardened));
        let resp = cli.post("/api/hello").body("plain text").send().await;
        resp.assert_status_is_ok();
        resp.assert_text(r#"{"received":"plain text"}"#).await;
    }
}
