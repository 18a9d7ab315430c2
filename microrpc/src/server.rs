use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;

use crate::{
    Connection, Listener, Result, Router,
    msg::Request,
    socket::{read_frame, write_frame},
};

/// RPC server: accepts connections and dispatches their requests through a
/// [`Router`].
///
/// ```rust,no_run
/// # use microrpc::{Context, Result, Router, Server};
/// # use std::{net::SocketAddr, str::FromStr, sync::Arc};
/// #[microrpc::service]
/// trait EchoService {
///     async fn echo(&self, ctx: &Context, req: &String) -> Result<String>;
/// }
///
/// struct EchoImpl;
///
/// impl EchoService for EchoImpl {
///     async fn echo(&self, _ctx: &Context, req: &String) -> Result<String> {
///         Ok(req.clone())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut router = Router::default();
/// EchoService::microrpc_export(Arc::new(EchoImpl), &mut router);
///
/// let server = Server::create(router);
/// let addr = SocketAddr::from_str("127.0.0.1:8000").unwrap();
/// server.listen(addr).await.unwrap();
/// server.join().await;
/// # }
/// ```
pub struct Server {
    router: Arc<Router>,
    listener: Listener,
}

impl Server {
    /// The router is frozen from here on.
    #[must_use]
    pub fn create(router: Router) -> Self {
        tracing::debug!("create server with {router:?}");
        Self {
            router: Arc::new(router),
            listener: Listener::default(),
        }
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Binds `addr` and serves it in the background.
    ///
    /// Returns the bound address, which tells the real port when `addr` uses
    /// port 0.
    ///
    /// # Errors
    ///
    /// Returns `TcpBindFailed` if the address cannot be bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.listener.start_listen(addr, &self.router).await
    }

    /// Serves an already bound listener in the background.
    ///
    /// # Errors
    ///
    /// Returns `TcpBindFailed` if the listener's address cannot be read.
    pub fn serve(&self, listener: TcpListener) -> Result<SocketAddr> {
        self.listener.start_serve(listener, &self.router)
    }

    /// Stops accepting and closes all connections. Use [`join`](Self::join)
    /// to wait until every task has exited.
    pub fn stop(&self) {
        self.listener.stop();
    }

    pub async fn join(&self) {
        self.listener.join().await;
    }
}

/// Serves requests on one connection until the peer closes it.
///
/// Requests are handled one at a time. No response is written for oneway
/// requests. Any read, write or framing error ends the connection.
pub(crate) async fn serve_connection<C: Connection>(router: &Router, mut stream: C) -> Result<()> {
    while let Some(frame) = read_frame(&mut stream).await? {
        let req = Request::decode(frame)?;
        let oneway = req.is_oneway();
        tracing::trace!(
            "recv request {} for {}.{}",
            req.request_id,
            req.service_name,
            req.method_name
        );

        let rsp = router.dispatch(req).await;
        if oneway {
            continue;
        }
        write_frame(&mut stream, &rsp.encode()?).await?;
    }
    Ok(())
}
