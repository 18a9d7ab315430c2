use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures_util::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    Context,
    error::{Error, ErrorKind, Result},
};

pub type Factory<C> = Box<dyn Fn() -> BoxFuture<'static, Result<C>> + Send + Sync>;

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct PoolConfig {
    /// Connections created up front. Must not exceed `max_idle_count`.
    #[serde_inline_default(PoolConfig::DEFAULT_INIT_COUNT)]
    pub init_count: usize,
    /// Hard cap on connections owned by the pool, idle or in use.
    #[serde_inline_default(PoolConfig::DEFAULT_MAX_COUNT)]
    pub max_count: usize,
    #[serde_inline_default(PoolConfig::DEFAULT_MAX_IDLE_COUNT)]
    pub max_idle_count: usize,
    #[serde_inline_default(PoolConfig::DEFAULT_MAX_IDLE_TIME)]
    #[serde(with = "humantime_serde")]
    pub max_idle_time: Duration,
}

impl PoolConfig {
    pub const DEFAULT_INIT_COUNT: usize = 1;
    pub const DEFAULT_MAX_COUNT: usize = 30;
    pub const DEFAULT_MAX_IDLE_COUNT: usize = 10;
    pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(60);

    fn validate(&self) -> Result<()> {
        if self.init_count > self.max_idle_count {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "init count {} can't be bigger than max idle count {}",
                    self.init_count, self.max_idle_count
                ),
            ));
        }
        if self.max_count == 0 || self.init_count > self.max_count {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "invalid max count {} for init count {}",
                    self.max_count, self.init_count
                ),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            init_count: Self::DEFAULT_INIT_COUNT,
            max_count: Self::DEFAULT_MAX_COUNT,
            max_idle_count: Self::DEFAULT_MAX_IDLE_COUNT,
            max_idle_time: Self::DEFAULT_MAX_IDLE_TIME,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub count: usize,
    pub idle: usize,
    pub waiting: usize,
}

struct IdleConn<C> {
    conn: C,
    last_active_time: Instant,
}

/// What a queued acquirer receives.
enum Grant<C> {
    /// A released connection.
    Conn(C),
    /// A reserved slot: the receiver must dial a new connection itself.
    Dial,
}

struct PoolState<C> {
    count: usize,
    idle: VecDeque<IdleConn<C>>,
    waiters: VecDeque<oneshot::Sender<Grant<C>>>,
}

/// A bounded pool of reusable connections.
///
/// At most `max_count` connections exist at once. Callers that find the pool
/// at capacity queue up and are served strictly in arrival order as
/// connections are released. Idle connections older than `max_idle_time` are
/// closed instead of being handed out.
///
/// All bookkeeping (`count`, idle set, wait-queue) lives behind a single
/// mutex that is never held across an `.await`.
pub struct Pool<C> {
    config: PoolConfig,
    factory: Factory<C>,
    state: Mutex<PoolState<C>>,
}

impl<C: Send + 'static> Pool<C> {
    /// Creates a pool and eagerly opens `init_count` connections.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an inconsistent config, or the factory's
    /// error if a warm-up connection cannot be created.
    pub async fn new<F, Fut>(config: PoolConfig, factory: F) -> Result<Arc<Self>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        config.validate()?;
        let factory: Factory<C> = Box::new(move || factory().boxed());

        let mut idle = VecDeque::with_capacity(config.max_idle_count);
        for _ in 0..config.init_count {
            idle.push_back(IdleConn {
                conn: factory().await?,
                last_active_time: Instant::now(),
            });
        }

        Ok(Arc::new(Self {
            state: Mutex::new(PoolState {
                count: idle.len(),
                idle,
                waiters: VecDeque::new(),
            }),
            config,
            factory,
        }))
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            count: state.count,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
        }
    }

    /// Takes a connection from the pool, creating or waiting for one as needed.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or `Cancelled`/`Timeout` when `ctx` ends
    /// first. A connection granted after cancellation is returned to the pool
    /// by a background task.
    pub async fn acquire(self: &Arc<Self>, ctx: &Context) -> Result<Pooled<C>> {
        if ctx.is_cancelled() {
            return Err(Error::kind(ErrorKind::Cancelled));
        }

        let waiter = {
            let mut state = self.lock();
            let now = Instant::now();
            while let Some(idle) = state.idle.pop_front() {
                if idle.last_active_time + self.config.max_idle_time <= now {
                    state.count -= 1;
                    tracing::debug!("close expired idle connection, count: {}", state.count);
                    continue;
                }
                return Ok(Pooled::new(self.clone(), idle.conn));
            }

            if state.count < self.config.max_count {
                state.count += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        match waiter {
            None => self.dial(ctx, Slot::new(self)).await,
            Some(rx) => self.wait(ctx, rx).await,
        }
    }

    async fn wait(
        self: &Arc<Self>,
        ctx: &Context,
        rx: oneshot::Receiver<Grant<C>>,
    ) -> Result<Pooled<C>> {
        let mut waiter = Waiter {
            pool: self.clone(),
            rx: Some(rx),
        };

        let granted = tokio::select! {
            grant = waiter.recv() => Ok(grant),
            err = ctx.done() => Err(err),
        };

        match granted {
            Ok(grant) => match grant? {
                Grant::Conn(conn) => Ok(Pooled::new(self.clone(), conn)),
                Grant::Dial => self.dial(ctx, Slot::new(self)).await,
            },
            Err(err) => {
                // the grant may still arrive; hand it back once it does.
                if let Some(rx) = waiter.rx.take() {
                    let pool = self.clone();
                    tokio::spawn(async move {
                        if let Ok(grant) = rx.await {
                            pool.reclaim(grant);
                        }
                    });
                }
                Err(err)
            }
        }
    }

    /// Dials into a slot that has already been counted.
    async fn dial(self: &Arc<Self>, ctx: &Context, slot: Slot<C>) -> Result<Pooled<C>> {
        let conn = ctx.run((self.factory)()).await?;
        slot.disarm();
        Ok(Pooled::new(self.clone(), conn))
    }

    /// Returns a healthy connection: to the oldest waiter, else to the idle
    /// set, else closes it.
    pub fn release(&self, conn: C) {
        let mut state = self.lock();
        let Some(Grant::Conn(conn)) = Self::hand_off(&mut state, Grant::Conn(conn)) else {
            return;
        };

        if state.idle.len() < self.config.max_idle_count {
            state.idle.push_back(IdleConn {
                conn,
                last_active_time: Instant::now(),
            });
        } else {
            state.count -= 1;
            drop(state);
            tracing::debug!("idle set is full, close connection");
            drop(conn);
        }
    }

    /// Closes a connection that must not be reused.
    pub fn discard(&self, conn: C) {
        drop(conn);
        self.forfeit_slot();
    }

    /// Gives up one counted slot, passing it to the oldest waiter if any.
    fn forfeit_slot(&self) {
        let mut state = self.lock();
        if Self::hand_off(&mut state, Grant::Dial).is_some() {
            state.count -= 1;
        }
    }

    fn reclaim(&self, grant: Grant<C>) {
        match grant {
            Grant::Conn(conn) => self.release(conn),
            Grant::Dial => self.forfeit_slot(),
        }
    }

    /// Delivers `grant` to the oldest live waiter, returning it if nobody took it.
    fn hand_off(state: &mut PoolState<C>, mut grant: Grant<C>) -> Option<Grant<C>> {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("config", &self.config).finish()
    }
}

/// A counted slot not yet backed by a connection. Dropping it un-counts it.
struct Slot<C: Send + 'static> {
    pool: Option<Arc<Pool<C>>>,
}

impl<C: Send + 'static> Slot<C> {
    fn new(pool: &Arc<Pool<C>>) -> Self {
        Self {
            pool: Some(pool.clone()),
        }
    }

    fn disarm(mut self) {
        self.pool = None;
    }
}

impl<C: Send + 'static> Drop for Slot<C> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.forfeit_slot();
        }
    }
}

/// A queued acquirer. If dropped before receiving, any grant already sent is
/// handed back to the pool.
struct Waiter<C: Send + 'static> {
    pool: Arc<Pool<C>>,
    rx: Option<oneshot::Receiver<Grant<C>>>,
}

impl<C: Send + 'static> Waiter<C> {
    async fn recv(&mut self) -> Result<Grant<C>> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::kind(ErrorKind::PoolClosed));
        };
        let grant = rx.await.map_err(|_| Error::kind(ErrorKind::PoolClosed));
        self.rx = None;
        grant
    }
}

impl<C: Send + 'static> Drop for Waiter<C> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(grant) = rx.try_recv() {
                self.pool.reclaim(grant);
            }
        }
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dropping the guard releases the connection back to the pool. While a
/// request is in flight the guard is marked busy; if it is dropped in that
/// state (an I/O error or a cancelled call), the stream may hold a partial
/// frame, so the connection is discarded instead.
pub struct Pooled<C: Send + 'static> {
    pool: Arc<Pool<C>>,
    conn: Option<C>,
    busy: bool,
}

impl<C: Send + 'static> Pooled<C> {
    fn new(pool: Arc<Pool<C>>, conn: C) -> Self {
        Self {
            pool,
            conn: Some(conn),
            busy: false,
        }
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Closes the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

impl<C: Send + 'static> std::fmt::Debug for Pooled<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> std::ops::Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().unwrap_or_else(|| unreachable!("pooled connection taken"))
    }
}

impl<C: Send + 'static> std::ops::DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("pooled connection taken"))
    }
}

impl<C: Send + 'static> Drop for Pooled<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.busy {
                tracing::debug!("discard connection with a request in flight");
                self.pool.discard(conn);
            } else {
                self.pool.release(conn);
            }
        }
    }
}
