#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use microrpc::{
    CallOptions, Client, ClientConfig, Context, Error, ErrorKind, MessagePackSerializer,
    PoolConfig, Reply, Result, Router, Server,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetByIdReq {
    pub id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetByIdRsp {
    pub msg: String,
}

#[microrpc::service(name = "user-service")]
pub trait UserService {
    async fn get_by_id(&self, ctx: &Context, req: &GetByIdReq) -> Result<GetByIdRsp>;

    async fn fail(&self, ctx: &Context, req: &GetByIdReq) -> Result<GetByIdRsp>;

    async fn notify(&self, ctx: &Context, req: &String) -> Result<()>;

    async fn trace_id(&self, ctx: &Context, req: &()) -> Result<Option<String>>;
}

#[microrpc::service(name = "order-service")]
pub trait OrderService {
    async fn get(&self, ctx: &Context, req: &u64) -> Result<String>;
}

struct UserServiceImpl {
    notified: mpsc::UnboundedSender<String>,
}

impl UserService for UserServiceImpl {
    async fn get_by_id(&self, _ctx: &Context, req: &GetByIdReq) -> Result<GetByIdRsp> {
        if req.id == 123 {
            Ok(GetByIdRsp { msg: "hi".into() })
        } else {
            Err(Error::business(format!("user {} not found", req.id)))
        }
    }

    async fn fail(&self, _ctx: &Context, _req: &GetByIdReq) -> Result<GetByIdRsp> {
        Err(Error::business("mock error"))
    }

    async fn notify(&self, _ctx: &Context, req: &String) -> Result<()> {
        let _ = self.notified.send(req.clone());
        Ok(())
    }

    async fn trace_id(&self, ctx: &Context, _req: &()) -> Result<Option<String>> {
        Ok(ctx.meta().get("trace-id").cloned())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn user_router() -> (Router, mpsc::UnboundedReceiver<String>) {
    let (notified, rx) = mpsc::unbounded_channel();
    let mut router = Router::default();
    UserService::microrpc_export(Arc::new(UserServiceImpl { notified }), &mut router);
    (router, rx)
}

async fn start(router: Router) -> (Server, SocketAddr) {
    init_tracing();
    let server = Server::create(router);
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (server, addr)
}

fn config(max_count: usize) -> ClientConfig {
    ClientConfig {
        pool: PoolConfig {
            init_count: 0,
            max_count,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_get_by_id() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let client = UserServiceClient::new(Client::connect(addr, config(4)).await.unwrap());
    let ctx = Context::background();
    let rsp = client.get_by_id(&ctx, &GetByIdReq { id: 123 }).await;
    assert_eq!(rsp, Ok(GetByIdRsp { msg: "hi".into() }));

    let err = client.get_by_id(&ctx, &GetByIdReq { id: 7 }).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.msg, "user 7 not found");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_remote_error_message() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let client = UserServiceClient::new(Client::connect(addr, config(4)).await.unwrap());
    let err = client
        .fail(&Context::background(), &GetByIdReq { id: 123 })
        .await
        .unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err.msg, "mock error");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_unknown_service_keeps_connection() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let client = Client::connect(addr, config(1)).await.unwrap();
    let orders = OrderServiceClient::new(client.clone());
    let users = UserServiceClient::new(client.clone());
    let ctx = Context::background();

    let err = orders.get(&ctx, &1).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.msg, "service not available");

    let rsp = users.get_by_id(&ctx, &GetByIdReq { id: 123 }).await.unwrap();
    assert_eq!(rsp.msg, "hi");
    assert_eq!(client.pool().stats().count, 1);
    assert_eq!(client.pool().stats().idle, 1);

    let err = client
        .call::<_, String>(&ctx, "user-service", "delete", &1u64)
        .await
        .unwrap_err();
    assert_eq!(err.msg, "method not found: user-service.delete");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_msgpack_serializer() {
    let (mut router, _rx) = user_router();
    router.register_serializer(MessagePackSerializer);
    let (server, addr) = start(router).await;

    let config = ClientConfig {
        serializer: MessagePackSerializer::CODE,
        ..config(2)
    };
    let client = UserServiceClient::new(Client::connect(addr, config).await.unwrap());
    let rsp = client
        .get_by_id(&Context::background(), &GetByIdReq { id: 123 })
        .await
        .unwrap();
    assert_eq!(rsp.msg, "hi");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_unsupported_serializer() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let config = ClientConfig {
        serializer: MessagePackSerializer::CODE,
        ..config(2)
    };
    let client = UserServiceClient::new(Client::connect(addr, config).await.unwrap());
    let err = client
        .get_by_id(&Context::background(), &GetByIdReq { id: 123 })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.msg, "serializer not supported: 2");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_oneway() {
    let (router, mut notified) = user_router();
    let (server, addr) = start(router).await;

    let client = UserServiceClient::new(Client::connect(addr, config(1)).await.unwrap());
    let ctx = Context::background();
    let reply = client
        .notify_with(&ctx, &"ping".to_string(), CallOptions::oneway())
        .await
        .unwrap();
    assert_eq!(reply, Reply::default());
    assert_eq!(notified.recv().await.as_deref(), Some("ping"));

    // the single pooled connection is still in step with the server.
    let rsp = client.get_by_id(&ctx, &GetByIdReq { id: 123 }).await.unwrap();
    assert_eq!(rsp.msg, "hi");
    assert_eq!(client.client().pool().stats().count, 1);

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_oneway_against_silent_server() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Ok(Some(frame)) = microrpc::read_frame(&mut stream).await {
            let _ = tx.send(microrpc::Request::decode(frame).unwrap());
        }
    });

    let config = ClientConfig {
        timeout: Duration::from_millis(200),
        ..config(1)
    };
    let client = UserServiceClient::new(Client::connect(addr, config).await.unwrap());
    let ctx = Context::background();
    client
        .notify_with(&ctx, &"ping".to_string(), CallOptions::oneway())
        .await
        .unwrap();

    let req = rx.recv().await.unwrap();
    assert!(req.is_oneway());
    assert_eq!(req.service_name, "user-service");
    assert_eq!(req.method_name, "notify");
    assert_eq!(&req.data[..], br#""ping""#);

    // a two-way call to the same server never gets an answer.
    let err = client
        .get_by_id(&ctx, &GetByIdReq { id: 123 })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(client.client().pool().stats().count, 0);
}

#[tokio::test]
async fn test_meta_propagation() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let client = UserServiceClient::new(Client::connect(addr, config(2)).await.unwrap());
    let ctx = Context::background().with_meta("trace-id", "abc");
    assert_eq!(client.trace_id(&ctx, &()).await, Ok(Some("abc".into())));
    assert_eq!(client.trace_id(&Context::background(), &()).await, Ok(None));

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_value_and_error() {
    let (mut router, _rx) = user_router();
    router.add_reply_method("user-service", "half", |_ctx, x: u64| async move {
        Reply::partial(x / 2, Error::business("odd input"))
    });
    let (server, addr) = start(router).await;

    let client = Client::connect(addr, config(2)).await.unwrap();
    let ctx = Context::background();
    let reply: Reply<u64> = client
        .invoke(&ctx, "user-service", "half", &7u64, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(reply.value, Some(3));
    assert_eq!(reply.error.map(|e| e.msg).as_deref(), Some("odd input"));

    server.stop();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let client = UserServiceClient::new(Client::connect(addr, config(4)).await.unwrap());
    let mut tasks = vec![];
    for _ in 0..32 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..16 {
                let rsp = client
                    .get_by_id(&Context::background(), &GetByIdReq { id: 123 })
                    .await
                    .unwrap();
                assert_eq!(rsp.msg, "hi");
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = client.client().pool().stats();
    assert!(stats.count <= 4);
    assert_eq!(stats.waiting, 0);

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_server_stop() {
    let (router, _rx) = user_router();
    let (server, addr) = start(router).await;

    let client = UserServiceClient::new(Client::connect(addr, config(1)).await.unwrap());
    let ctx = Context::background();
    client.get_by_id(&ctx, &GetByIdReq { id: 123 }).await.unwrap();

    server.stop();
    server.join().await;

    client
        .get_by_id(&ctx, &GetByIdReq { id: 123 })
        .await
        .unwrap_err();
    let err = Client::connect(addr, ClientConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TcpConnectFailed);
}
