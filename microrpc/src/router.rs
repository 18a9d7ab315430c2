use std::{collections::HashMap, future::Future, sync::Arc};

use bytes::Bytes;
use foldhash::fast::RandomState;
use futures_util::{FutureExt, future::BoxFuture};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Context, Reply,
    error::{Error, ErrorKind, Result},
    msg::{Request, Response},
    serializer::{Serializer, SerializerExt, SerializerRegistry},
};

/// A type-erased method handler.
///
/// It receives the raw argument bytes and the serializer negotiated for the
/// request, and yields the encoded result.
pub type Method =
    Box<dyn Fn(Context, Bytes, Arc<dyn Serializer>) -> BoxFuture<'static, Reply<Bytes>> + Send + Sync>;

type MethodTable = HashMap<String, Method, RandomState>;

/// Service and serializer registry used by the server to dispatch requests.
#[derive(Default)]
pub struct Router {
    services: HashMap<String, MethodTable, RandomState>,
    serializers: SerializerRegistry,
}

impl Router {
    /// Registers a batch of methods under `service`, merging with any
    /// methods already registered for it.
    pub fn register_service(
        &mut self,
        service: impl Into<String>,
        methods: impl IntoIterator<Item = (String, Method)>,
    ) {
        self.services
            .entry(service.into())
            .or_default()
            .extend(methods);
    }

    pub fn register_serializer(&mut self, serializer: impl Serializer) {
        self.serializers.register(serializer);
    }

    #[must_use]
    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// Registers a typed method whose handler returns a plain `Result`.
    pub fn add_method<Req, Rsp, F, Fut>(&mut self, service: &str, method: &str, f: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Rsp: Serialize + Send + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Rsp>> + Send + 'static,
    {
        self.add_reply_method(service, method, move |ctx, req: Req| f(ctx, req).map(Reply::from));
    }

    /// Registers a typed method that may return a value and an error together.
    pub fn add_reply_method<Req, Rsp, F, Fut>(&mut self, service: &str, method: &str, f: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Rsp: Serialize + Send + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply<Rsp>> + Send + 'static,
    {
        let handler: Method = Box::new(move |ctx, data, serializer| {
            let req = match serializer.decode_value::<Req>(&data) {
                Ok(req) => req,
                Err(err) => return futures_util::future::ready(Reply::err(err)).boxed(),
            };
            let fut = f(ctx, req);
            async move { encode_reply(&*serializer, fut.await) }.boxed()
        });
        self.register_service(service, [(method.to_string(), handler)]);
    }

    pub fn service_names(&self) -> impl Iterator<Item = &String> {
        self.services.keys()
    }

    pub fn method_names<'a>(&'a self, service: &str) -> impl Iterator<Item = &'a String> + use<'a> {
        self.services.get(service).into_iter().flat_map(HashMap::keys)
    }

    /// Routes a decoded request to its handler and builds the response.
    ///
    /// The response echoes the request's id, version, compressor and
    /// serializer. Routing and decoding failures are reported in its error
    /// field.
    pub async fn dispatch(&self, req: Request) -> Response {
        let mut rsp = Response::for_request(&req);
        let reply = self.invoke(req).await;
        if let Some(err) = reply.error {
            rsp.error = Bytes::from(err.wire_message());
        }
        if let Some(data) = reply.value {
            rsp.data = data;
        }
        rsp
    }

    async fn invoke(&self, req: Request) -> Reply<Bytes> {
        let Some(methods) = self.services.get(&req.service_name) else {
            tracing::warn!("service not available: {}", req.service_name);
            return Reply::err(Error::new(
                ErrorKind::ServiceNotAvailable,
                "service not available",
            ));
        };
        let Some(method) = methods.get(&req.method_name) else {
            let msg = format!("method not found: {}.{}", req.service_name, req.method_name);
            tracing::warn!("{msg}");
            return Reply::err(Error::new(ErrorKind::MethodNotFound, msg));
        };
        let serializer = match self.serializers.get(req.serializer) {
            Ok(serializer) => serializer,
            Err(err) => {
                tracing::warn!("{err}");
                return Reply::err(err);
            }
        };

        let ctx = Context::server_ctx(&req);
        method(ctx, req.data, serializer).await
    }
}

fn encode_reply<Rsp: Serialize>(serializer: &dyn Serializer, reply: Reply<Rsp>) -> Reply<Bytes> {
    let Reply { value, error } = reply;
    match value.map(|value| serializer.encode_value(&value)) {
        None => Reply { value: None, error },
        Some(Ok(data)) => Reply {
            value: Some(data),
            error,
        },
        Some(Err(err)) => Reply::err(error.unwrap_or(err)),
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field(
                "services",
                &self
                    .services
                    .iter()
                    .map(|(name, methods)| (name, methods.keys().collect::<Vec<_>>()))
                    .collect::<Vec<_>>(),
            )
            .field("serializers", &self.serializers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{JsonSerializer, MessagePackSerializer};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct GetByIdReq {
        id: u64,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct GetByIdRsp {
        msg: String,
    }

    fn router() -> Router {
        let mut router = Router::default();
        router.add_method("user-service", "get_by_id", |_ctx, req: GetByIdReq| async move {
            if req.id == 123 {
                Ok(GetByIdRsp { msg: "hi".into() })
            } else {
                Err(Error::business("mock error"))
            }
        });
        router.add_reply_method("user-service", "partial", |_ctx, req: GetByIdReq| async move {
            Reply::partial(req.id, Error::business("partial error"))
        });
        router.add_method("user-service", "meta", |ctx: Context, (): ()| async move {
            Ok::<_, Error>(ctx.meta().get("trace-id").cloned())
        });
        router
    }

    fn request(service: &str, method: &str, serializer: u8, data: &[u8]) -> Request {
        let mut req = Request::new(service, method);
        req.request_id = 77;
        req.serializer = serializer;
        req.data = Bytes::copy_from_slice(data);
        req
    }

    #[tokio::test]
    async fn test_dispatch() {
        let router = router();

        let rsp = router
            .dispatch(request("user-service", "get_by_id", 1, br#"{"id":123}"#))
            .await;
        assert_eq!(rsp.request_id, 77);
        assert_eq!(rsp.serializer, 1);
        assert_eq!(rsp.error_message(), None);
        assert_eq!(&rsp.data[..], br#"{"msg":"hi"}"#);

        let rsp = router
            .dispatch(request("user-service", "get_by_id", 1, br#"{"id":1}"#))
            .await;
        assert_eq!(rsp.error_message().as_deref(), Some("mock error"));
        assert!(rsp.data.is_empty());
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let router = router();

        let rsp = router
            .dispatch(request("no-such-service", "get_by_id", 1, b"{}"))
            .await;
        assert_eq!(rsp.error_message().as_deref(), Some("service not available"));

        let rsp = router
            .dispatch(request("user-service", "delete", 1, b"{}"))
            .await;
        assert_eq!(
            rsp.error_message().as_deref(),
            Some("method not found: user-service.delete")
        );

        let rsp = router
            .dispatch(request("user-service", "get_by_id", 9, br#"{"id":123}"#))
            .await;
        assert_eq!(rsp.serializer, 9);
        assert_eq!(
            rsp.error_message().as_deref(),
            Some("serializer not supported: 9")
        );

        let rsp = router
            .dispatch(request("user-service", "get_by_id", 1, br#"{"name":"x"}"#))
            .await;
        assert!(rsp.error_message().is_some());
        assert!(rsp.data.is_empty());
    }

    #[tokio::test]
    async fn test_value_and_error() {
        let router = router();
        let rsp = router
            .dispatch(request("user-service", "partial", 1, br#"{"id":5}"#))
            .await;
        assert_eq!(rsp.error_message().as_deref(), Some("partial error"));
        assert_eq!(&rsp.data[..], b"5");
    }

    #[tokio::test]
    async fn test_registered_serializer() {
        let mut router = router();
        let data = MessagePackSerializer
            .encode_value(&GetByIdReq { id: 123 })
            .unwrap();
        let req = request("user-service", "get_by_id", MessagePackSerializer::CODE, &data);

        let rsp = router.dispatch(req.clone()).await;
        assert!(rsp.error_message().is_some());

        router.register_serializer(MessagePackSerializer);
        let rsp = router.dispatch(req).await;
        assert_eq!(rsp.error_message(), None);
        let value: GetByIdRsp = MessagePackSerializer.decode_value(&rsp.data).unwrap();
        assert_eq!(value.msg, "hi");
    }

    #[tokio::test]
    async fn test_server_context_meta() {
        let router = router();
        let mut req = request("user-service", "meta", JsonSerializer::CODE, b"");
        req.meta.insert("trace-id".into(), "abc".into());
        let rsp = router.dispatch(req).await;
        assert_eq!(&rsp.data[..], br#""abc""#);
    }

    #[test]
    fn test_names() {
        let router = router();
        assert_eq!(router.service_names().collect::<Vec<_>>(), ["user-service"]);
        let mut methods = router.method_names("user-service").collect::<Vec<_>>();
        methods.sort();
        assert_eq!(methods, ["get_by_id", "meta", "partial"]);
        assert_eq!(router.method_names("other").count(), 0);
    }
}
