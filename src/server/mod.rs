//! Connection manager: accepts sockets, owns per-connection sessions and
//! runs the background tasks (timeout sweep, follower link).

mod commands;
pub mod handler;
pub mod registry;
pub mod session;

pub use handler::{Handler, Reply};
pub use session::{Session, SessionId};

use crate::blocking::BlockingCoordinator;
use crate::config::Config;
use crate::error::AppError;
use crate::metrics::Metrics;
use crate::protocol::{FramedReader, ReplySink};
use crate::replication::{self, Replication, Role};
use crate::snapshot;
use crate::storage::{PubSub, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// State shared by every connection.
pub struct ServerContext {
    pub config: Config,
    pub store: Arc<Store>,
    pub pubsub: PubSub,
    pub blocking: BlockingCoordinator,
    pub replication: Replication,
    /// Serializes apply+propagate of writes so followers see the leader's
    /// apply order.
    pub write_gate: Mutex<()>,
}

impl ServerContext {
    pub fn new(config: Config, store: Arc<Store>) -> Self {
        let role = match &config.replication.replicaof {
            Some(leader) => Role::Follower(leader.clone()),
            None => Role::Leader,
        };
        Self {
            blocking: BlockingCoordinator::new(store.clone()),
            pubsub: PubSub::new(),
            replication: Replication::new(role),
            write_gate: Mutex::new(()),
            store,
            config,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Seed the store from the snapshot file and bind the listener.
    pub async fn bind(mut config: Config) -> Result<Self, AppError> {
        let store = Arc::new(Store::new());
        let loaded = snapshot::load_into(
            &store,
            &config.snapshot.dir,
            &config.snapshot.dbfilename,
        )?;
        if loaded > 0 {
            info!(keys = loaded, "Snapshot loaded");
        }

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        // port 0 binds an ephemeral port; report the real one
        config.server.port = listener.local_addr()?.port();

        let ctx = Arc::new(ServerContext::new(config, store));
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), AppError> {
        let role = match self.ctx.replication.role() {
            Role::Leader => "leader".to_string(),
            Role::Follower(leader) => format!("follower of {}", leader),
        };
        info!("Server listening on {} as {}", self.local_addr()?, role);

        let sweeper = tokio::spawn(sweep_timeouts(self.ctx.clone()));
        let follower = match self.ctx.replication.role() {
            Role::Follower(leader) => Some(tokio::spawn(replication::run_follower(
                self.ctx.clone(),
                leader.clone(),
            ))),
            Role::Leader => None,
        };

        let result = self.accept_loop().await;

        sweeper.abort();
        if let Some(follower) = follower {
            follower.abort();
        }
        result
    }

    /// Run until Ctrl-C.
    pub async fn run_until_ctrl_c(self) -> Result<(), AppError> {
        tokio::select! {
            result = self.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }

    async fn accept_loop(&self) -> Result<(), AppError> {
        loop {
            let (socket, addr) = self.listener.accept().await?;
            let ctx = self.ctx.clone();

            tokio::spawn(async move {
                info!("New connection from {}", addr);
                Metrics::get().increment_connections();
                if let Err(e) = handle_connection(socket, ctx).await {
                    error!("Error handling connection from {}: {}", addr, e);
                }
                info!("Connection from {} closed", addr);
            });
        }
    }
}

async fn sweep_timeouts(ctx: Arc<ServerContext>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(ctx.config.blocking.sweep_interval_ms));
    loop {
        interval.tick().await;
        ctx.blocking.sweep_now().await;
    }
}

async fn handle_connection(socket: TcpStream, ctx: Arc<ServerContext>) -> std::io::Result<()> {
    socket.set_nodelay(true)?;
    let (read_half, mut write_half) = socket.into_split();

    let (sink, mut rx) = ReplySink::channel();
    let mut writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                debug!("Write failed: {}", e);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut session = Session::new(sink);
    let handler = Handler::new(ctx);
    let mut reader = FramedReader::new(read_half);

    let result = handler.serve(&mut session, &mut reader).await;
    handler.drop_session(&session).await;

    // the writer stops once every sink clone is gone
    drop(session);
    if tokio::time::timeout(Duration::from_secs(1), &mut writer)
        .await
        .is_err()
    {
        warn!("Writer did not drain in time");
        writer.abort();
    }

    result
}

impl Handler {
    /// Release everything a disconnected session left behind.
    pub async fn drop_session(&self, session: &Session) {
        let channels = session.channels();
        self.ctx.pubsub.drop_session(session.id, channels.iter());
        self.ctx.blocking.drop_session(session.id).await;
        self.ctx.replication.leader().remove_follower(session.id);
        debug!(session = session.id, "Session released");
    }
}
