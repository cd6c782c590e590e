#[cfg(test)]
mod channel {
    use http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::{error::Error, sync::Arc, time::Duration};
    use switchyard_lib::{
        CallFuture, Channel, ChannelConfig, Clients, Endpoint, ErrorKind, LeakDetector, Request,
        Resources, ServiceChannel, ServicesConfig,
        transport::{ReqwestChannelFactory, TransportConfig},
    };
    use test_utils::{base_uris, mock_cluster, mock_server, received};
    use url::Url;
    use wiremock::{
        Mock, ResponseTemplate,
        matchers::{body_string, header, method, path, query_param},
    };

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    const SERVICE: &str = "items";

    fn endpoint(method: Method) -> Endpoint {
        Endpoint::new(SERVICE, "getItem", "1.0.0", method, "/items/{id}")
    }

    fn item(id: &str) -> Request {
        Request::builder().path_param("id", id).build()
    }

    fn resources(transport: &TransportConfig) -> Result<Resources> {
        let factory = ReqwestChannelFactory::new(transport)?;
        Ok(Resources::new("integration-tests", Arc::new(factory))
            .with_leak_detector(Arc::new(LeakDetector::new(1.0))))
    }

    /// Fast backoff so retries do not slow the suite down
    fn config(uris: Vec<Url>) -> ChannelConfig {
        ChannelConfig::builder()
            .backoff_slot_size(Duration::from_millis(10))
            .max_backoff(Duration::from_millis(50))
            .build()
            .with_uris(uris)
    }

    fn service_channel(config: &ChannelConfig) -> Result<ServiceChannel> {
        let resources = resources(&TransportConfig::default())?;
        Ok(ServiceChannel::new(SERVICE, config, &resources)?)
    }

    #[tokio::test]
    async fn test_renders_request() -> Result<()> {
        let mock_server = wiremock::MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/items/42"))
            .and(query_param("dry-run", "true"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"name":"anvil"}"#))
            .respond_with(ResponseTemplate::new(StatusCode::OK).set_body_json(json!({"id": 42})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let channel = service_channel(&config(base_uris!([&mock_server])))?;
        let request = Request::builder()
            .path_param("id", "42")
            .query("dry-run", "true")
            .body(
                http::HeaderValue::from_static("application/json"),
                r#"{"name":"anvil"}"#,
            )
            .build();
        let value: Value = channel
            .execute(&endpoint(Method::PUT), request)
            .await?
            .json()
            .await?;
        assert_eq!(value, json!({"id": 42}));
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_error_is_decoded() -> Result<()> {
        let body = json!({
            "errorCode": "NOT_FOUND",
            "errorName": "Items:ItemNotFound",
            "errorInstanceId": "4c2c9f1e-0000-0000-0000-000000000000",
            "parameters": {"itemId": "7"}
        });
        let mock_server = mock_server!(StatusCode::NOT_FOUND, set_body_json(body));
        let channel = service_channel(&config(base_uris!([&mock_server])))?;

        let error = channel
            .execute(&endpoint(Method::GET), item("7"))
            .await
            .unwrap_err();
        let ErrorKind::Remote { status, error } = error else {
            panic!("expected a remote error, got {error:?}");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error = error.expect("structured error body");
        assert_eq!(error.error_name, "Items:ItemNotFound");
        assert_eq!(error.parameters["itemId"], "7");
        // client errors are never retried
        assert_eq!(received!(mock_server), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_errors_retry_only_idempotent_methods() -> Result<()> {
        let mock_server = mock_server!(StatusCode::INTERNAL_SERVER_ERROR);
        let channel = service_channel(&config(base_uris!([&mock_server])).with_max_num_retries(2))?;

        let result = channel.execute(&endpoint(Method::GET), item("1")).await;
        assert_eq!(
            result.unwrap_err().status(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
        assert_eq!(received!(mock_server), 3);

        let result = channel.execute(&endpoint(Method::POST), item("1")).await;
        assert!(result.is_err());
        assert_eq!(received!(mock_server), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_host_fails_over() -> Result<()> {
        let unavailable = mock_server!(StatusCode::SERVICE_UNAVAILABLE);
        let healthy = mock_server!(StatusCode::OK);
        let channel =
            service_channel(&config(base_uris!([&unavailable, &healthy])).with_max_num_retries(1))?;

        for _ in 0..3 {
            let mut response = channel.execute(&endpoint(Method::GET), item("1")).await?;
            assert_eq!(response.status(), StatusCode::OK);
            response.close();
        }
        // once the pin left the unavailable host it stays on the healthy one
        assert!(received!(unavailable) <= 1);
        assert_eq!(received!(healthy), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_spread_over_cluster() -> Result<()> {
        let servers = mock_cluster!(3, StatusCode::TOO_MANY_REQUESTS);
        let channel = service_channel(&config(base_uris!(servers)).with_max_num_retries(2))?;

        let error = channel
            .execute(&endpoint(Method::GET), item("1"))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ErrorKind::Qos {
                status: StatusCode::TOO_MANY_REQUESTS,
                ..
            }
        ));
        for server in &servers {
            assert_eq!(received!(server), 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried_by_default() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_secs(2)));
        let transport = TransportConfig::builder()
            .timeout(Duration::from_millis(200))
            .build();
        let resources = resources(&transport)?;
        let channel = ServiceChannel::new(
            SERVICE,
            &config(base_uris!([&mock_server])),
            &resources,
        )?;

        let error = channel
            .execute(&endpoint(Method::GET), item("1"))
            .await
            .unwrap_err();
        assert!(matches!(error, ErrorKind::Timeout(_)), "{error:?}");
        assert_eq!(received!(mock_server), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_refused_connection() -> Result<()> {
        // Nothing listens on port 9 of the loopback interface
        let uri = Url::parse("http://127.0.0.1:9/api")?;
        let channel = service_channel(&config(vec![uri]).with_max_num_retries(0))?;

        let error = channel
            .execute(&endpoint(Method::GET), item("1"))
            .await
            .unwrap_err();
        assert!(matches!(error, ErrorKind::Connection(_)), "{error:?}");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_aborts_exchange() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_secs(10)));
        let channel = service_channel(&config(base_uris!([&mock_server])))?;

        let call: CallFuture<_> = channel.execute(&endpoint(Method::GET), item("1"));
        let canceller = call.canceller();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let error = call.await.unwrap_err();
        assert!(error.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_response_is_reported() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK, set_body_string("unread"));
        let resources = resources(&TransportConfig::default())?;
        let channel = ServiceChannel::new(SERVICE, &config(base_uris!([&mock_server])), &resources)?;

        let response = channel.execute(&endpoint(Method::GET), item("1")).await?;
        drop(response);
        let body = channel
            .execute(&endpoint(Method::GET), item("2"))
            .await?
            .bytes()
            .await?;
        assert_eq!(body.as_ref(), b"unread");

        assert_eq!(resources.leak_detector().total_leaks(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_clients_share_channels() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK);
        let clients = Clients::new(resources(&TransportConfig::default())?);
        let config = ServicesConfig::default()
            .with_service(SERVICE, config(base_uris!([&mock_server])));

        let first = clients.channel(SERVICE, &config)?;
        let second = clients.channel(SERVICE, &config)?;
        assert!(Arc::ptr_eq(&first, &second));

        let mut response = second.execute(&endpoint(Method::GET), item("1")).await?;
        response.close();
        assert_eq!(first.host_stats().len(), 1);
        Ok(())
    }
}
