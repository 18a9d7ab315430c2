use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::{TcpListener, TcpStream};

use crate::{
    Connection, Router, TaskSupervisor,
    error::{Error, ErrorKind, Result},
    server::serve_connection,
};

/// Pause after a failed `accept`, e.g. when the process is out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming connections for the accept loop.
pub(crate) trait Acceptor: Send + Sync + 'static {
    type Stream: Connection;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("set nodelay for {peer} failed: {e}");
        }
        Ok((stream, peer))
    }
}

/// Accepts TCP connections and serves each one on its own task.
pub struct Listener {
    task_supervisor: TaskSupervisor,
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener {
    #[must_use]
    pub fn new() -> Self {
        Self {
            task_supervisor: TaskSupervisor::create(),
        }
    }

    /// # Errors
    ///
    /// Returns `TcpBindFailed` if `addr` cannot be bound.
    pub async fn start_listen(&self, addr: SocketAddr, router: &Arc<Router>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;
        self.start_serve(listener, router)
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns `TcpBindFailed` if the local address cannot be read.
    pub fn start_serve(&self, listener: TcpListener, router: &Arc<Router>) -> Result<SocketAddr> {
        let listener_addr = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;
        self.spawn_accept_loop(listener, listener_addr, router.clone());
        Ok(listener_addr)
    }

    fn spawn_accept_loop<A: Acceptor>(&self, acceptor: A, listener_addr: SocketAddr, router: Arc<Router>) {
        let guard = self.task_supervisor.start_async_task();
        tokio::spawn(async move {
            tracing::info!("start listening: {listener_addr}");
            loop {
                let (stream, peer) = tokio::select! {
                    () = guard.stopped() => break,
                    accepted = acceptor.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!("accept on {listener_addr} failed: {e}");
                            tokio::select! {
                                () = guard.stopped() => break,
                                () = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                            }
                        }
                    },
                };

                tracing::debug!("accept connection from {peer}");
                let conn_guard = guard.start_async_task();
                let router = router.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = conn_guard.stopped() => {}
                        result = serve_connection(&router, stream) => match result {
                            Ok(()) => tracing::debug!("connection from {peer} closed"),
                            Err(e) => tracing::warn!("connection from {peer} failed: {e}"),
                        }
                    }
                });
            }
            tracing::info!("stop accept loop: {listener_addr}");
        });
    }

    pub fn stop(&self) {
        self.task_supervisor.stop();
    }

    pub async fn join(&self) {
        self.task_supervisor.all_stopped().await;
    }
}
