use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{JsonRpcError, JsonRpcErrorObject},
    message::JsonRpcMessage,
    notification::JsonRpcNotification,
    request::JsonRpcRequest,
    response::JsonRpcResponse,
};

/// Per-call context handed to every handler.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Session the call arrived on, when the transport multiplexes sessions
    pub session_id: Option<String>,
    /// Cancelled when the serving loop shuts down
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            session_id: None,
            cancel,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Trait for handling JSON-RPC method calls
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    /// The error type returned by this handler
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handle a method call. Returns domain errors only; the dispatcher turns
    /// them into JSON-RPC errors.
    async fn handle(
        &self,
        method: &str,
        params: Option<Value>,
        context: RequestContext,
    ) -> Result<Value, Self::Error>;

    /// Handle a notification (default ignores it)
    async fn handle_notification(
        &self,
        method: &str,
        params: Option<Value>,
        context: RequestContext,
    ) -> Result<(), Self::Error> {
        let _ = (method, params, context);
        Ok(())
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![]
    }
}

/// Trait for errors that can be converted to JSON-RPC error objects
pub trait ToJsonRpcError: std::error::Error + Send + Sync + 'static {
    fn to_error_object(&self) -> JsonRpcErrorObject;
}

/// General purpose handler error.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Passed through to the peer verbatim
    #[error("{message}")]
    Application {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl ToJsonRpcError for DispatchError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            DispatchError::InvalidParams(msg) => JsonRpcErrorObject::invalid_params(msg),
            DispatchError::MethodNotFound(method) => JsonRpcErrorObject::method_not_found(method),
            DispatchError::Internal(msg) => JsonRpcErrorObject::internal_error(Some(msg.clone())),
            DispatchError::Application {
                code,
                message,
                data,
            } => JsonRpcErrorObject::application(*code, message.clone(), data.clone()),
        }
    }
}

/// Adapts an async closure into a [`JsonRpcHandler`].
pub struct FunctionHandler<F> {
    handler_fn: F,
}

impl<F> FunctionHandler<F> {
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut, E> JsonRpcHandler for FunctionHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    async fn handle(
        &self,
        _method: &str,
        params: Option<Value>,
        context: RequestContext,
    ) -> Result<Value, Self::Error> {
        (self.handler_fn)(params, context).await
    }
}

/// Routes method names to handlers sharing one error type.
pub struct JsonRpcDispatcher<E = DispatchError>
where
    E: ToJsonRpcError,
{
    handlers: HashMap<String, Arc<dyn JsonRpcHandler<Error = E>>>,
    default_handler: Option<Arc<dyn JsonRpcHandler<Error = E>>>,
}

impl<E> JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    /// Register a handler for a specific method
    pub fn register_method<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    /// Register a handler for multiple methods
    pub fn register_methods<H>(&mut self, methods: Vec<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        let handler_arc: Arc<dyn JsonRpcHandler<Error = E>> = Arc::new(handler);
        for method in methods {
            self.handlers.insert(method, handler_arc.clone());
        }
    }

    /// Register an async closure for a method
    pub fn register_fn<F, Fut>(&mut self, method: impl Into<String>, handler_fn: F)
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
    {
        self.register_method(method, FunctionHandler::new(handler_fn));
    }

    /// Set a default handler for unregistered methods
    pub fn set_default_handler<H>(&mut self, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.default_handler = Some(Arc::new(handler));
    }

    fn handler_for(&self, method: &str) -> Option<&Arc<dyn JsonRpcHandler<Error = E>>> {
        self.handlers.get(method).or(self.default_handler.as_ref())
    }

    /// Run a request and produce exactly one reply message.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> JsonRpcMessage {
        let Some(handler) = self.handler_for(&request.method) else {
            return JsonRpcError::method_not_found(request.id, &request.method).into();
        };

        match handler.handle(&request.method, request.params, context).await {
            Ok(result) => JsonRpcResponse::new(request.id, result).into(),
            Err(domain_error) => {
                debug!(method = %request.method, error = %domain_error, "handler returned error");
                JsonRpcError::new(Some(request.id), domain_error.to_error_object()).into()
            }
        }
    }

    /// Run a notification. Unknown methods are ignored.
    pub async fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        context: RequestContext,
    ) -> Result<(), E> {
        match self.handler_for(&notification.method) {
            Some(handler) => {
                handler
                    .handle_notification(&notification.method, notification.params, context)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Route any decoded message. Returns the reply to write, if one is owed.
    pub async fn dispatch(
        &self,
        message: JsonRpcMessage,
        context: RequestContext,
    ) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request, context).await),
            JsonRpcMessage::Notification(notification) => {
                let method = notification.method.clone();
                if let Err(e) = self.handle_notification(notification, context).await {
                    warn!(method = %method, error = %e, "notification handler failed");
                }
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_) => {
                debug!(id = ?message.id(), "ignoring response sent to server");
                None
            }
        }
    }

    /// Get all registered methods
    pub fn registered_methods(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl<E> Default for JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestId;
    use serde_json::json;

    #[derive(thiserror::Error, Debug)]
    enum TestError {
        #[error("Test error: {0}")]
        TestError(String),
        #[error("Unknown method: {0}")]
        UnknownMethod(String),
    }

    impl ToJsonRpcError for TestError {
        fn to_error_object(&self) -> JsonRpcErrorObject {
            match self {
                TestError::TestError(msg) => JsonRpcErrorObject::internal_error(Some(msg.clone())),
                TestError::UnknownMethod(method) => JsonRpcErrorObject::method_not_found(method),
            }
        }
    }

    struct TestHandler;

    #[async_trait]
    impl JsonRpcHandler for TestHandler {
        type Error = TestError;

        async fn handle(
            &self,
            method: &str,
            _params: Option<Value>,
            _context: RequestContext,
        ) -> Result<Value, Self::Error> {
            match method {
                "add" => Ok(json!({"result": "addition"})),
                "error" => Err(TestError::TestError("test error".to_string())),
                _ => Err(TestError::UnknownMethod(method.to_string())),
            }
        }

        fn supported_methods(&self) -> Vec<String> {
            vec!["add".to_string(), "error".to_string()]
        }
    }

    #[tokio::test]
    async fn test_dispatcher_success() {
        let mut dispatcher: JsonRpcDispatcher<TestError> = JsonRpcDispatcher::new();
        dispatcher.register_method("add", TestHandler);

        let request = JsonRpcRequest::new_no_params(RequestId::Number(1), "add");
        let response = dispatcher
            .handle_request(request, RequestContext::default())
            .await;
        assert_eq!(response.id(), Some(&RequestId::Number(1)));
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn test_dispatcher_domain_error() {
        let mut dispatcher: JsonRpcDispatcher<TestError> = JsonRpcDispatcher::new();
        dispatcher.register_methods(TestHandler.supported_methods(), TestHandler);

        let request = JsonRpcRequest::new_no_params(RequestId::from("e"), "error");
        match dispatcher
            .handle_request(request, RequestContext::default())
            .await
        {
            JsonRpcMessage::Error(e) => {
                assert_eq!(e.id, Some(RequestId::from("e")));
                assert_eq!(e.error.code, -32603);
                assert_eq!(e.error.message, "test error");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_method_not_found() {
        let dispatcher: JsonRpcDispatcher<TestError> = JsonRpcDispatcher::new();

        let request = JsonRpcRequest::new_no_params(RequestId::Number(1), "unknown");
        let response = dispatcher
            .handle_request(request, RequestContext::default())
            .await;
        assert_eq!(response.id(), Some(&RequestId::Number(1)));
        match response {
            JsonRpcMessage::Error(e) => assert_eq!(e.error.code, -32601),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_fn_and_dispatch() {
        let mut dispatcher: JsonRpcDispatcher = JsonRpcDispatcher::new();
        dispatcher.register_fn("echo", |params, ctx: RequestContext| async move {
            Ok(json!({"params": params, "session": ctx.session_id}))
        });
        dispatcher.register_fn("teapot", |_params, _ctx| async move {
            Err(DispatchError::Application {
                code: 418,
                message: "short and stout".to_string(),
                data: Some(json!({"spout": true})),
            })
        });

        let context = RequestContext::default().with_session("s-1");
        let reply = dispatcher
            .dispatch(
                JsonRpcRequest::new(RequestId::Number(5), "echo", Some(json!([1, 2]))).into(),
                context.clone(),
            )
            .await
            .unwrap();
        match reply {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.result["params"], json!([1, 2]));
                assert_eq!(r.result["session"], "s-1");
            }
            other => panic!("expected response, got {:?}", other),
        }

        let reply = dispatcher
            .dispatch(
                JsonRpcRequest::new_no_params(RequestId::Number(6), "teapot").into(),
                context.clone(),
            )
            .await
            .unwrap();
        match reply {
            JsonRpcMessage::Error(e) => {
                assert_eq!(e.error.code, 418);
                assert_eq!(e.error.data, Some(json!({"spout": true})));
            }
            other => panic!("expected error, got {:?}", other),
        }

        let none = dispatcher
            .dispatch(JsonRpcNotification::new_no_params("echo").into(), context)
            .await;
        assert!(none.is_none());
    }
}
