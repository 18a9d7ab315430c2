use clap::Parser;
use microrpc::{Context, Error, MessagePackSerializer, Result, Router, Server};
use microrpc_demo::{EchoService, GetByIdReq, GetByIdRsp, UserService};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// Do not accept MessagePack payloads.
    #[arg(long, default_value_t = false)]
    pub json_only: bool,
}

#[derive(Default)]
struct DemoImpl {
    tracked: AtomicU64,
}

impl UserService for DemoImpl {
    async fn get_by_id(&self, _c: &Context, r: &GetByIdReq) -> Result<GetByIdRsp> {
        match r.id {
            0 => Err(Error::business("invalid user id")),
            id => Ok(GetByIdRsp {
                msg: format!("hi, user {id}"),
            }),
        }
    }

    async fn track(&self, c: &Context, r: &String) -> Result<()> {
        let total = self.tracked.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!("track #{} ({}): {r}", total, c.request_id());
        Ok(())
    }
}

impl EchoService for DemoImpl {
    async fn echo(&self, _c: &Context, r: &String) -> Result<String> {
        Ok(r.clone())
    }
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let demo = Arc::new(DemoImpl::default());
    let mut router = Router::default();
    UserService::microrpc_export(demo.clone(), &mut router);
    EchoService::microrpc_export(demo.clone(), &mut router);
    if !args.json_only {
        router.register_serializer(MessagePackSerializer);
    }

    let server = Server::create(router);
    let addr = match server.listen(args.addr).await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("listen on {} failed: {e}", args.addr);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Serving {:?} on {}...",
        [
            <DemoImpl as UserService>::NAME,
            <DemoImpl as EchoService>::NAME
        ],
        addr
    );

    tokio::select! {
        () = server.join() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            server.stop();
            server.join().await;
        }
    }
}
