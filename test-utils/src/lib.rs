//! `test-utils` is used by the integration tests of `switchyard-lib`.
//! This crate does not depend on `switchyard-lib`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status to
/// every request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any()).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Start `n` mock servers which all respond with the same predefined status
#[macro_export]
macro_rules! mock_cluster {
    ($n:expr, $status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mut servers = Vec::new();
        for _ in 0..$n {
            servers.push($crate::mock_server!($status $(, $func ($($arg),*))*));
        }
        servers
    }};
}

/// The base URIs of the given mock servers, each with an `/api` prefix
#[macro_export]
macro_rules! base_uris {
    ($servers:expr) => {{
        $servers
            .iter()
            .map(|server| url::Url::parse(&format!("{}/api", server.uri())).expect("Expected valid mock server URI"))
            .collect::<Vec<_>>()
    }};
}

/// Number of requests a mock server received so far
#[macro_export]
macro_rules! received {
    ($server:expr) => {
        $server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    };
}
