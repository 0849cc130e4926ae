// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Newline-delimited JSON-RPC dispatcher.
//!
//! Wire format: one JSON object per line in both directions.
//! Request: `{"id": any, "method": string, "params": object?}`.
//! Response: `{"id": ..., "result": ...}` or `{"id": ..., "error": {...}}`.
//!
//! A [`Dispatcher`] is a static registry of named handlers, each given a
//! shared `Ctx` value and the raw `params` object; handlers never panic
//! the caller — any error path (including a panicking handler, caught at
//! the call site) is converted to a structured `error` response.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, RpcError};

/// Incoming request envelope.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Outgoing response envelope.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    fn err(id: Value, error: &RpcError) -> Self {
        Self { id, result: None, error: Some(error.to_wire()) }
    }

    /// Serialize as a single newline-terminated JSON line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"id":null,"error":{"code":-32603,"message":"response serialization failed"}}"#
                .to_vec()
        });
        bytes.push(b'\n');
        bytes
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
type HandlerFn<Ctx> = dyn Fn(Ctx, Value) -> HandlerFuture + Send + Sync;

/// Registry of method name to handler, shared (read-only) across
/// connections. `Ctx` is whatever shared state handlers need — typically
/// an `Arc<Store>` — and must be cheap to clone.
pub struct Dispatcher<Ctx> {
    handlers: HashMap<&'static str, Arc<HandlerFn<Ctx>>>,
}

impl<Ctx> Default for Dispatcher<Ctx> {
    fn default() -> Self {
        Self { handlers: HashMap::new() }
    }
}

impl<Ctx: Clone + Send + 'static> Dispatcher<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `method`. `f` receives the shared context
    /// and the raw `params` value and returns a result value or a
    /// structured error.
    pub fn register<F, Fut>(&mut self, method: &'static str, f: F)
    where
        F: Fn(Ctx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.handlers.insert(method, Arc::new(move |ctx, params| Box::pin(f(ctx, params))));
    }

    /// Parse, dispatch, and serialize a single request line. Always
    /// returns a response line — malformed input still gets a response
    /// with `id: null`.
    pub async fn dispatch_line(&self, ctx: Ctx, line: &[u8]) -> Vec<u8> {
        let request: Request = match serde_json::from_slice(line) {
            Ok(r) => r,
            Err(e) => {
                let err = RpcError::new(ErrorCode::ParseError, e.to_string());
                return Response::err(Value::Null, &err).to_line();
            }
        };

        let Some(handler) = self.handlers.get(request.method.as_str()) else {
            let err = RpcError::new(
                ErrorCode::MethodNotFound,
                format!("unknown method: {}", request.method),
            );
            return Response::err(request.id, &err).to_line();
        };

        // Catch panics so a single buggy handler cannot take the daemon
        // down; the request still gets exactly one response.
        let fut = handler(ctx, request.params);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(result)) => Response::ok(request.id, result).to_line(),
            Ok(Err(e)) => Response::err(request.id, &e).to_line(),
            Err(_) => {
                let err = RpcError::new(ErrorCode::Internal, "handler panicked");
                Response::err(request.id, &err).to_line()
            }
        }
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

/// Small extension so we can `.catch_unwind()` a boxed future without
/// pulling in `futures` just for this.
trait CatchUnwindExt: Future + Sized {
    fn catch_unwind(self) -> futures_lite_catch_unwind::CatchUnwind<Self>;
}

impl<F: Future> CatchUnwindExt for F {
    fn catch_unwind(self) -> futures_lite_catch_unwind::CatchUnwind<Self> {
        futures_lite_catch_unwind::CatchUnwind::new(self)
    }
}

/// Minimal local re-implementation of `futures::FutureExt::catch_unwind`
/// so the dispatcher doesn't need the `futures` crate for one combinator.
mod futures_lite_catch_unwind {
    use std::any::Any;
    use std::future::Future;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    pub struct CatchUnwind<F> {
        inner: F,
    }

    impl<F> CatchUnwind<F> {
        pub fn new(inner: F) -> Self {
            Self { inner }
        }
    }

    impl<F: Future + Unpin> Future for CatchUnwind<F> {
        type Output = Result<F::Output, Box<dyn Any + Send>>;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            match catch_unwind(AssertUnwindSafe(|| Pin::new(&mut self.inner).poll(cx))) {
                Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
                Ok(Poll::Pending) => Poll::Pending,
                Err(e) => Poll::Ready(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Ctx;

    #[tokio::test]
    async fn ping_round_trip() {
        let mut dispatcher: Dispatcher<Ctx> = Dispatcher::new();
        dispatcher.register("ping", |_ctx, _params| async { Ok(serde_json::json!({"pong": true})) });

        let line = br#"{"id":1,"method":"ping","params":{}}"#;
        let response = dispatcher.dispatch_line(Ctx, line).await;
        let parsed: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["result"]["pong"], true);
    }

    #[tokio::test]
    async fn unknown_method_produces_structured_error() {
        let dispatcher: Dispatcher<Ctx> = Dispatcher::new();
        let line = br#"{"id":"x","method":"nope","params":{}}"#;
        let response = dispatcher.dispatch_line(Ctx, line).await;
        let parsed: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(parsed["id"], "x");
        assert_eq!(parsed["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn malformed_json_gets_a_response_with_null_id() {
        let dispatcher: Dispatcher<Ctx> = Dispatcher::new();
        let response = dispatcher.dispatch_line(Ctx, b"not json").await;
        let parsed: Value = serde_json::from_slice(&response).expect("valid json");
        assert!(parsed["id"].is_null());
        assert_eq!(parsed["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn panicking_handler_is_converted_to_internal_error() {
        let mut dispatcher: Dispatcher<Ctx> = Dispatcher::new();
        dispatcher.register("boom", |_ctx, _params| async {
            panic!("handler exploded")
        });
        let line = br#"{"id":2,"method":"boom","params":{}}"#;
        let response = dispatcher.dispatch_line(Ctx, line).await;
        let parsed: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(parsed["id"], 2);
        assert_eq!(parsed["error"]["code"], -32603);
    }
}
