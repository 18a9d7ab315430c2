use clap::Parser;
use microrpc::*;
use microrpc_demo::{EchoService, EchoServiceClient, GetByIdReq, UserService, UserServiceClient};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// User id to look up.
    #[arg(short, long, default_value = "123")]
    pub id: u64,

    /// Request value.
    #[arg(short, long, default_value = "alice")]
    pub value: String,

    /// Use MessagePack
    #[arg(long, default_value_t = false)]
    pub use_msgpack: bool,

    /// Call timeout.
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Maximum number of pooled connections.
    #[arg(long, default_value = "30")]
    pub max_conns: usize,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "60")]
    pub secs: u64,

    /// The number of coroutines.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.timeout,
            serializer: if self.use_msgpack {
                MessagePackSerializer::CODE
            } else {
                JsonSerializer::CODE
            },
            pool: PoolConfig {
                max_count: self.max_conns,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct State {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test(args: Args, client: Client) {
    let state = Arc::new(State::default());
    let start_time = std::time::Instant::now();
    let mut tasks = vec![];
    for _ in 0..args.coroutines {
        let echo = EchoServiceClient::new(client.clone());
        let value = args.value.clone();
        let state = state.clone();
        let secs = args.secs;
        tasks.push(tokio::spawn(async move {
            let ctx = Context::background();
            while start_time.elapsed().as_secs() < secs {
                for _ in 0..256 {
                    let result = echo.echo(&ctx, &value).await;
                    state.total.fetch_add(1, Ordering::AcqRel);
                    if result.is_err() {
                        state.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                let _ = task.await;
            }
        } => {
        }
        _ = async {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = state.total.swap(0, Ordering::AcqRel);
                let fails = state.fails.swap(0, Ordering::AcqRel);
                tracing::info!(
                    "QPS: {total}/s, fails: {fails}/s, pool: {:?}",
                    client.pool().stats()
                );
            }
        } => {
        }
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

    let client = match Client::connect(args.addr, args.client_config()).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("connect to {} failed: {e}", args.addr);
            std::process::exit(1);
        }
    };

    if args.stress {
        stress_test(args, client).await;
    } else {
        let ctx = Context::background().with_meta("trace-id", "demo-client");
        let users = UserServiceClient::new(client.clone());
        let echo = EchoServiceClient::new(client);

        let rsp = users.get_by_id(&ctx, &GetByIdReq { id: args.id }).await;
        tracing::info!("get_by_id rsp: {:?}", rsp);

        let rsp = users
            .track_with(&ctx, &format!("looked up {}", args.id), CallOptions::oneway())
            .await;
        tracing::info!("track (oneway) rsp: {:?}", rsp);

        let rsp = echo.echo(&ctx, &args.value).await;
        tracing::info!("echo rsp: {:?}", rsp);
    }
}
