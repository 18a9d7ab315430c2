use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_inline_default::serde_inline_default;
use tokio::net::TcpStream;

use crate::{
    Connection, Context, Reply,
    error::{Error, ErrorKind, Result},
    msg::{ONEWAY_KEY, Request, Response},
    pool::{Pool, PoolConfig},
    serializer::{
        JsonSerializer, MessagePackSerializer, Serializer, SerializerExt, SerializerRegistry,
    },
    socket::{read_frame, write_frame},
    tcp::TcpConnector,
};

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ClientConfig {
    /// Upper bound for a whole call, including waiting for a connection.
    #[serde_inline_default(ClientConfig::DEFAULT_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde_inline_default(ClientConfig::DEFAULT_CONNECT_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Code of the serializer used for arguments and results: 1 for JSON,
    /// 2 for MessagePack.
    #[serde_inline_default(JsonSerializer::CODE)]
    pub serializer: u8,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl ClientConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            serializer: JsonSerializer::CODE,
            pool: PoolConfig::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Return as soon as the request is written; the server sends no reply.
    pub oneway: bool,
    /// Overrides [`ClientConfig::timeout`] for this call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub fn oneway() -> Self {
        Self {
            oneway: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Issues calls to one server over a pool of connections.
///
/// Cloning is cheap; clones share the pool.
pub struct Client<C = TcpStream> {
    pool: Arc<Pool<C>>,
    serializer: Arc<dyn Serializer>,
    config: Arc<ClientConfig>,
    next_request_id: Arc<AtomicU32>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            serializer: self.serializer.clone(),
            config: self.config.clone(),
            next_request_id: self.next_request_id.clone(),
        }
    }
}

impl Client<TcpStream> {
    /// Creates a client for the server at `addr`, opening the pool's initial
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid pool config or unknown serializer
    /// code, or if a warm-up connection cannot be established.
    pub async fn connect(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::new(addr, config.connect_timeout);
        let pool = Pool::new(config.pool.clone(), move || async move {
            connector.connect().await
        })
        .await?;
        Self::with_pool(pool, config)
    }
}

impl<C: Connection> Client<C> {
    /// Creates a client on top of an existing pool. `config.pool` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `SerializerNotSupported` if `config.serializer` is neither
    /// JSON nor MessagePack; use [`with_serializer`](Self::with_serializer)
    /// for other serializers.
    pub fn with_pool(pool: Arc<Pool<C>>, config: ClientConfig) -> Result<Self> {
        let mut builtin = SerializerRegistry::default();
        builtin.register(MessagePackSerializer);
        Ok(Self {
            pool,
            serializer: builtin.get(config.serializer)?,
            config: Arc::new(config),
            next_request_id: Arc::default(),
        })
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<Pool<C>> {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn serializer(&self) -> &dyn Serializer {
        &*self.serializer
    }

    /// Calls `service.method` and waits for its result.
    ///
    /// # Errors
    ///
    /// Transport and codec errors are returned as is. An error sent by the
    /// server comes back as `ErrorKind::Remote` with the server's text.
    pub async fn call<Req, Rsp>(
        &self,
        ctx: &Context,
        service: &str,
        method: &str,
        req: &Req,
    ) -> Result<Rsp>
    where
        Req: Serialize + ?Sized,
        Rsp: DeserializeOwned,
    {
        self.invoke(ctx, service, method, req, CallOptions::default())
            .await?
            .into_result()
    }

    /// Calls `service.method` with explicit options and returns the full
    /// reply, which may hold a value and a server error at once.
    ///
    /// A oneway call returns an empty reply once the request is written.
    ///
    /// # Errors
    ///
    /// Returns transport, codec, timeout and cancellation errors. Errors sent
    /// by the server are carried in [`Reply::error`] instead.
    pub async fn invoke<Req, Rsp>(
        &self,
        ctx: &Context,
        service: &str,
        method: &str,
        req: &Req,
        opts: CallOptions,
    ) -> Result<Reply<Rsp>>
    where
        Req: Serialize + ?Sized,
        Rsp: DeserializeOwned,
    {
        let mut request = Request::new(service, method);
        request.request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        request.serializer = self.serializer.code();
        request.meta = ctx.meta().clone();
        // only `CallOptions` decides whether the server replies.
        request.meta.remove(ONEWAY_KEY);
        if opts.oneway {
            request.set_oneway();
        }
        request.data = self.serializer.encode_value(req)?;
        request.calculate_header_length()?;
        request.calculate_body_length()?;
        let frame = request.encode()?;

        let ctx = ctx.with_timeout(opts.timeout.unwrap_or(self.config.timeout));
        let response = ctx
            .run(async {
                let mut conn = self.pool.acquire(&ctx).await?;
                conn.set_busy(true);
                write_frame(&mut *conn, &frame).await?;
                if opts.oneway {
                    conn.set_busy(false);
                    return Ok(None);
                }

                let Some(frame) = read_frame(&mut *conn).await? else {
                    return Err(Error::new(
                        ErrorKind::TcpRecvMsgFailed,
                        "connection closed by peer",
                    ));
                };
                let response = Response::decode(frame)?;
                if response.request_id != request.request_id {
                    return Err(Error::new(
                        ErrorKind::TcpParseMsgFailed,
                        format!(
                            "response id {} does not match request id {}",
                            response.request_id, request.request_id
                        ),
                    ));
                }
                conn.set_busy(false);
                Ok(Some(response))
            })
            .await?;

        match response {
            Some(response) => self.reply(&response),
            None => Ok(Reply::default()),
        }
    }

    fn reply<Rsp: DeserializeOwned>(&self, response: &Response) -> Result<Reply<Rsp>> {
        let error = response
            .error_message()
            .map(|msg| Error::new(ErrorKind::Remote, msg));
        if error.is_some() && response.data.is_empty() {
            return Ok(Reply { value: None, error });
        }

        match self.serializer.decode_value(&response.data) {
            Ok(value) => Ok(Reply {
                value: Some(value),
                error,
            }),
            Err(err) => match error {
                Some(error) => {
                    tracing::debug!("drop undecodable value next to remote error: {err}");
                    Ok(Reply::err(error))
                }
                None => Err(err),
            },
        }
    }
}

impl<C> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("serializer", &self.serializer.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Router;
    use tokio::io::DuplexStream;

    async fn duplex_client(router: Router, config: ClientConfig) -> Client<DuplexStream> {
        let router = Arc::new(router);
        let pool = Pool::new(config.pool.clone(), move || {
            let router = router.clone();
            async move {
                let (client, server) = tokio::io::duplex(4096);
                tokio::spawn(async move {
                    let _ = crate::server::serve_connection(&router, server).await;
                });
                Ok::<_, Error>(client)
            }
        })
        .await
        .unwrap();
        Client::with_pool(pool, config).unwrap()
    }

    fn router() -> Router {
        let mut router = Router::default();
        router.register_serializer(MessagePackSerializer);
        router.add_method("math", "double", |_ctx, x: u64| async move {
            Ok::<_, Error>(x * 2)
        });
        router.add_method("math", "sleep", |_ctx, ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, Error>(())
        });
        router.add_reply_method("math", "half", |_ctx, x: u64| async move {
            if x % 2 == 0 {
                Reply::ok(x / 2)
            } else {
                Reply::partial(x / 2, Error::business("odd input"))
            }
        });
        router
    }

    #[test]
    fn test_default_config() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.connect_timeout, Duration::from_secs(3));

        let config: ClientConfig =
            serde_json::from_str(r#"{"timeout": "200ms", "serializer": 2}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.serializer, MessagePackSerializer::CODE);
    }

    #[tokio::test]
    async fn test_call() {
        for serializer in [JsonSerializer::CODE, MessagePackSerializer::CODE] {
            let config = ClientConfig {
                serializer,
                ..Default::default()
            };
            let client = duplex_client(router(), config).await;
            assert_eq!(client.serializer().code(), serializer);

            let rsp: u64 = client
                .call(&Context::background(), "math", "double", &21u64)
                .await
                .unwrap();
            assert_eq!(rsp, 42);
        }
    }

    #[tokio::test]
    async fn test_reply_with_value_and_error() {
        let client = duplex_client(router(), ClientConfig::default()).await;
        let ctx = Context::background();

        let reply: Reply<u64> = client
            .invoke(&ctx, "math", "half", &7u64, CallOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.value, Some(3));
        let error = reply.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Remote);
        assert_eq!(error.msg, "odd input");

        let err = client.call::<_, u64>(&ctx, "math", "half", &7u64).await.unwrap_err();
        assert_eq!(err.msg, "odd input");
    }

    #[tokio::test]
    async fn test_timeout_discards_connection() {
        let mut config = ClientConfig::default();
        config.pool.init_count = 0;
        config.pool.max_count = 1;
        let client = duplex_client(router(), config).await;
        let ctx = Context::background();

        let err = client
            .invoke::<_, ()>(
                &ctx,
                "math",
                "sleep",
                &1000u64,
                CallOptions::default().with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(client.pool().stats().count, 0);

        // a fresh connection serves the next call.
        let rsp: u64 = client.call(&ctx, "math", "double", &1u64).await.unwrap();
        assert_eq!(rsp, 2);
        assert_eq!(client.pool().stats().count, 1);
    }

    #[tokio::test]
    async fn test_context_cannot_force_oneway() {
        let mut config = ClientConfig::default();
        config.pool.max_count = 1;
        config.timeout = Duration::from_millis(500);
        let client = duplex_client(router(), config).await;

        let ctx = Context::background().with_meta(ONEWAY_KEY, "true");
        let rsp: u64 = client.call(&ctx, "math", "double", &5u64).await.unwrap();
        assert_eq!(rsp, 10);
        assert_eq!(client.pool().stats().count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let client = duplex_client(router(), ClientConfig::default()).await;
        let ctx = Context::background();
        ctx.cancel();
        let err = client
            .call::<_, u64>(&ctx, "math", "double", &1u64)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let client = duplex_client(router(), ClientConfig::default()).await;
        let ctx = Context::background();
        for _ in 0..3 {
            let _: u64 = client.call(&ctx, "math", "double", &1u64).await.unwrap();
        }
        assert_eq!(client.next_request_id.load(Ordering::Acquire), 3);
    }

    #[tokio::test]
    async fn test_unknown_serializer_code() {
        let config = ClientConfig {
            serializer: 9,
            ..Default::default()
        };
        let pool = Pool::new(config.pool.clone(), || async {
            Ok::<_, Error>(tokio::io::duplex(64).0)
        })
        .await
        .unwrap();
        let err = Client::with_pool(pool, config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SerializerNotSupported);
        assert_eq!(err.msg, "serializer not supported: 9");
    }
}
