//! Chain-level behaviour, checked against every engine through `serve_http`.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{ACCEPT_ENCODING, ALLOW, CONTENT_ENCODING};
use axum::http::StatusCode;
use flate2::read::GzDecoder;

use message_gateway::config::RouterConfig;
use message_gateway::http::middleware::{RequestIdMiddleware, Timeout, REQUEST_ID_HEADER};
use message_gateway::{
    handler_fn, middleware_fn, AdapterRegistry, Handler, RouteMeta, RouterContext, RouterError,
};

mod common;
use common::*;

#[tokio::test]
async fn test_middleware_runs_in_onion_order() {
    for engine in ENGINES {
        let log = trace();
        let adapter = adapter(engine);
        adapter.register_middleware(recording("global", &log)).unwrap();

        let handler_log = log.clone();
        let handler: Arc<dyn Handler> = handler_fn(move |ctx| {
            let log = handler_log.clone();
            Box::pin(async move {
                log.lock().push("handler".to_string());
                ctx.text(StatusCode::OK, "ok")
            })
        });

        let api = adapter.register_group("/api", vec![recording("api", &log)]);
        let v1 = api.group("/v1", vec![recording("v1", &log)]);
        v1.register_route(RouteMeta::new("GET", "/sms", handler).with_middleware(recording("route", &log)))
            .unwrap();

        let response = adapter.serve_http(get("/api/v1/sms")).await;
        assert_eq!(response.status(), StatusCode::OK, "engine {engine}");
        assert_eq!(
            *log.lock(),
            vec![
                "global:before",
                "api:before",
                "v1:before",
                "route:before",
                "handler",
                "route:after",
                "v1:after",
                "api:after",
                "global:after",
            ],
            "engine {engine}"
        );
    }
}

#[tokio::test]
async fn test_short_circuit_skips_handler() {
    for engine in ENGINES {
        let log = trace();
        let adapter = adapter(engine);
        adapter
            .register_middleware(middleware_fn(|ctx, _next| {
                Box::pin(async move { ctx.text(StatusCode::UNAUTHORIZED, "login first") })
            }))
            .unwrap();

        let handler_log = log.clone();
        adapter
            .get(
                "/sms",
                handler_fn(move |ctx| {
                    let log = handler_log.clone();
                    Box::pin(async move {
                        log.lock().push("handler".to_string());
                        ctx.text(StatusCode::OK, "ok")
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(get("/sms")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "engine {engine}");
        assert_eq!(body_string(response).await, "login first");
        assert!(log.lock().is_empty(), "engine {engine}");
    }
}

#[tokio::test]
async fn test_context_propagates_through_long_chains() {
    const DEPTH: usize = 25;
    for engine in ENGINES {
        let adapter = adapter(engine);
        for _ in 0..DEPTH {
            adapter
                .register_middleware(middleware_fn(|ctx, next| {
                    Box::pin(async move {
                        let depth = ctx.get::<usize>("depth").copied().unwrap_or(0);
                        ctx.set("depth", depth + 1);
                        let scope = ctx.context().with_value("tenant", "acme".to_string());
                        ctx.set_context(scope);
                        next.run(ctx).await
                    })
                }))
                .unwrap();
        }
        adapter
            .get(
                "/depth",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let depth = ctx.get::<usize>("depth").copied().unwrap_or(0);
                        let tenant = ctx.context().value::<String>("tenant").cloned().unwrap_or_default();
                        ctx.text(StatusCode::OK, format!("{depth}:{tenant}"))
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(get("/depth")).await;
        assert_eq!(body_string(response).await, format!("{DEPTH}:acme"), "engine {engine}");
    }
}

#[tokio::test]
async fn test_second_write_keeps_first_response() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter
            .get(
                "/twice",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        ctx.text(StatusCode::ACCEPTED, "first")?;
                        ctx.json(StatusCode::OK, &serde_json::json!({"second": true}))
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(get("/twice")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED, "engine {engine}");
        assert_eq!(body_string(response).await, "first", "engine {engine}");
    }
}

#[tokio::test]
async fn test_not_found_and_method_not_allowed() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.get("/sms/:id", text("get")).unwrap();
        adapter.put("/sms/:id", text("put")).unwrap();

        let response = adapter.serve_http(get("/reports")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "engine {engine}");
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");

        let response = adapter.serve_http(request("DELETE", "/sms/7", "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "engine {engine}");
        assert_eq!(response.headers()[ALLOW], "GET, PUT", "engine {engine}");
        assert_eq!(body_json(response).await["error"]["code"], "METHOD_NOT_ALLOWED");
    }
}

#[tokio::test]
async fn test_method_is_matched_across_path_shapes() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.get("/users/:id", text("by-id")).unwrap();
        adapter.post("/users/me", text("me")).unwrap();

        let response = adapter.serve_http(get("/users/me")).await;
        assert_eq!(response.status(), StatusCode::OK, "engine {engine}");
        assert_eq!(body_string(response).await, "by-id", "engine {engine}");

        let response = adapter.serve_http(request("POST", "/users/me", "")).await;
        assert_eq!(body_string(response).await, "me", "engine {engine}");

        let response = adapter.serve_http(request("DELETE", "/users/me", "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "engine {engine}");
        assert_eq!(response.headers()[ALLOW], "GET, POST", "engine {engine}");
    }
}

#[tokio::test]
async fn test_first_registered_route_wins() {
    for engine in ENGINES {
        let param_first = adapter(engine);
        param_first.get("/sms/:id", text("by-id")).unwrap();
        param_first.get("/sms/latest", text("latest")).unwrap();
        let response = param_first.serve_http(get("/sms/latest")).await;
        assert_eq!(body_string(response).await, "by-id", "engine {engine}");

        let literal_first = adapter(engine);
        literal_first.get("/sms/latest", text("latest")).unwrap();
        literal_first.get("/sms/:id", text("by-id")).unwrap();
        let response = literal_first.serve_http(get("/sms/latest")).await;
        assert_eq!(body_string(response).await, "latest", "engine {engine}");
        let response = literal_first.serve_http(get("/sms/7")).await;
        assert_eq!(body_string(response).await, "by-id", "engine {engine}");
    }
}

#[tokio::test]
async fn test_misses_run_global_middleware() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.register_middleware(Arc::new(RequestIdMiddleware::new())).unwrap();
        let response = adapter.serve_http(get("/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "engine {engine}");
        assert!(response.headers().contains_key(REQUEST_ID_HEADER), "engine {engine}");
    }
}

#[tokio::test]
async fn test_path_parameters() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter
            .get(
                "/sms/:id/status/:state",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let id = ctx.param("id").unwrap_or_default().to_string();
                        let state = ctx.param("state").unwrap_or_default().to_string();
                        ctx.text(StatusCode::OK, format!("{id}/{state}"))
                    })
                }),
            )
            .unwrap();
        adapter
            .get(
                "/files/*path",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let path = ctx.param("path").unwrap_or_default().to_string();
                        ctx.text(StatusCode::OK, path)
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(get("/sms/42/status/delivered")).await;
        assert_eq!(body_string(response).await, "42/delivered", "engine {engine}");

        let response = adapter.serve_http(get("/files/reports/2024/may.csv")).await;
        assert_eq!(body_string(response).await, "reports/2024/may.csv", "engine {engine}");

        let response = adapter.serve_http(get("/sms/hello%20world/status/sent")).await;
        assert_eq!(body_string(response).await, "hello world/sent", "engine {engine}");
    }
}

#[tokio::test]
async fn test_handler_error_renders_envelope() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter
            .post(
                "/sms",
                handler_fn(|_ctx| {
                    Box::pin(async move {
                        Err(RouterError::http(StatusCode::CONFLICT, "message already queued").with_code("DUPLICATE"))
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(request("POST", "/sms", "{}")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT, "engine {engine}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "DUPLICATE", "engine {engine}");
        assert_eq!(body["error"]["message"], "message already queued", "engine {engine}");
    }
}

#[tokio::test]
async fn test_handler_panic_is_500() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter
            .get(
                "/boom",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        if ctx.path() == "/boom" {
                            panic!("template store unavailable");
                        }
                        Ok(())
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(get("/boom")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "engine {engine}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "internal server error");
    }
}

#[tokio::test]
async fn test_error_handler_is_swappable() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.get("/sms", text("ok")).unwrap();

        let response = adapter.serve_http(get("/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "engine {engine}");

        adapter.set_error_handler(Arc::new(|ctx: &mut RouterContext, err: RouterError| {
            let _ = ctx.text(StatusCode::IM_A_TEAPOT, format!("custom {}", err.code()));
        }));
        let response = adapter.serve_http(get("/missing")).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT, "engine {engine}");
        assert_eq!(body_string(response).await, "custom NOT_FOUND", "engine {engine}");
    }
}

#[tokio::test]
async fn test_registration_errors() {
    for engine in ENGINES {
        let adapter = adapter(engine);

        let err = adapter.handle("", "/sms", text("x")).unwrap_err();
        assert!(matches!(err, RouterError::InvalidRoute(_)), "engine {engine}");

        let err = adapter.handle("GET", "sms", text("x")).unwrap_err();
        assert!(matches!(err, RouterError::InvalidRoute(_)), "engine {engine}");

        let err = adapter.handle("GE T", "/sms", text("x")).unwrap_err();
        assert!(matches!(err, RouterError::InvalidRoute(_)), "engine {engine}");

        let missing_handler = RouteMeta {
            method: "GET".into(),
            path: "/sms".into(),
            ..RouteMeta::default()
        };
        let err = adapter.register_route(missing_handler).unwrap_err();
        assert!(matches!(err, RouterError::InvalidRoute(_)), "engine {engine}");

        adapter.get("/sms/:id", text("x")).unwrap();
        let err = adapter.get("/sms/:id", text("y")).unwrap_err();
        assert!(matches!(err, RouterError::RouteConflict { .. }), "engine {engine}");
    }
}

#[tokio::test]
async fn test_use_native_rejects_foreign_types() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        let err = adapter.use_native(Box::new(42_u32)).unwrap_err();
        assert!(matches!(err, RouterError::TypeMismatch { .. }), "engine {engine}");
        assert!(err.to_string().contains(engine), "engine {engine}: {err}");
    }
}

#[tokio::test]
async fn test_gzip_round_trip_and_min_size() {
    let large = "delivery report line\n".repeat(200);
    for engine in ENGINES {
        let adapter = adapter_with(RouterConfig {
            enable_compression: true,
            compression_level: 6,
            ..config_for(engine)
        });
        let body = large.clone();
        adapter
            .get(
                "/report",
                handler_fn(move |ctx| {
                    let body = body.clone();
                    Box::pin(async move { ctx.text(StatusCode::OK, body) })
                }),
            )
            .unwrap();
        adapter.get("/small", text("tiny")).unwrap();

        let mut req = get("/report");
        req.headers_mut().insert(ACCEPT_ENCODING, "gzip, br".parse().unwrap());
        let response = adapter.serve_http(req).await;
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip", "engine {engine}");
        let compressed = body_bytes(response).await;
        assert!(compressed.len() < large.len(), "engine {engine}");

        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, large, "engine {engine}");

        let mut req = get("/small");
        req.headers_mut().insert(ACCEPT_ENCODING, "gzip".parse().unwrap());
        let response = adapter.serve_http(req).await;
        assert!(!response.headers().contains_key(CONTENT_ENCODING), "engine {engine}");
        assert_eq!(body_string(response).await, "tiny");

        let response = adapter.serve_http(get("/report")).await;
        assert!(!response.headers().contains_key(CONTENT_ENCODING), "engine {engine}");
    }
}

#[tokio::test]
async fn test_body_limit_rejects_with_413() {
    for engine in ENGINES {
        let adapter = adapter_with(RouterConfig {
            body_limit_bytes: 16,
            ..config_for(engine)
        });
        adapter
            .post(
                "/sms",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let body = ctx.body_bytes().await?;
                        ctx.text(StatusCode::OK, format!("{}", body.len()))
                    })
                }),
            )
            .unwrap();

        let response = adapter.serve_http(request("POST", "/sms", "0123456789")).await;
        assert_eq!(response.status(), StatusCode::OK, "engine {engine}");
        assert_eq!(body_string(response).await, "10");

        let response = adapter.serve_http(request("POST", "/sms", "x".repeat(64))).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE, "engine {engine}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
        assert!(body["error"]["message"].as_str().unwrap_or_default().contains("16 B"), "engine {engine}");
    }
}

#[tokio::test]
async fn test_timeout_renders_504() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        let api = adapter.register_group("/api", vec![Arc::new(Timeout::new(Duration::from_millis(50)))]);
        api.get("/slow", slow(Duration::from_secs(2))).unwrap();
        api.get("/fast", slow(Duration::from_millis(1))).unwrap();

        let response = adapter.serve_http(get("/api/slow")).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT, "engine {engine}");
        assert_eq!(body_json(response).await["error"]["code"], "GATEWAY_TIMEOUT");

        let response = adapter.serve_http(get("/api/fast")).await;
        assert_eq!(response.status(), StatusCode::OK, "engine {engine}");
    }
}

#[tokio::test]
async fn test_write_timeout_does_not_cut_handlers_short() {
    for engine in ENGINES {
        let adapter = adapter_with(RouterConfig {
            write_timeout_secs: 1,
            ..config_for(engine)
        });
        adapter.get("/report", slow(Duration::from_millis(1200))).unwrap();

        let response = adapter.serve_http(get("/report")).await;
        assert_eq!(response.status(), StatusCode::OK, "engine {engine}");
        assert_eq!(body_string(response).await, "done", "engine {engine}");
    }
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    for engine in ENGINES {
        let adapter = adapter(engine);
        adapter.register_middleware(Arc::new(RequestIdMiddleware::new())).unwrap();
        adapter.get("/sms", text("ok")).unwrap();

        let mut req = get("/sms");
        req.headers_mut().insert(REQUEST_ID_HEADER, "req-123".parse().unwrap());
        let response = adapter.serve_http(req).await;
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-123", "engine {engine}");
    }
}

#[test]
fn test_unknown_engine_is_an_error() {
    let err = AdapterRegistry::with_builtin_engines()
        .create(&config_for("gin"))
        .err()
        .unwrap();
    assert!(matches!(err, RouterError::UnknownEngine(_)));
}

#[test]
#[should_panic(expected = "failed to create router adapter")]
fn test_must_create_panics_on_bad_config() {
    let config = RouterConfig {
        port: 0,
        ..RouterConfig::default()
    };
    message_gateway::must_new_router_adapter(&config);
}
