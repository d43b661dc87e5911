//! HTTP daemon: a plain hyper/http1 server on a TCP listener with a
//! watch-channel shutdown, serving the capability-key routes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::Config;
use crate::services::claims::ClaimService;
use crate::services::fanout::EventFanout;
use crate::services::jobs::JobService;
use crate::services::ledger::{LedgerPolicy, LedgerService};
use crate::services::limits::RateLimiter;
use crate::services::resolver::KeyResolver;
use crate::services::{SharedStore, shared_store};
use crate::store::SqliteStore;

mod handlers;
mod router;
mod stream;

/// Everything a request handler needs, constructed once at process start
/// and passed by handle. No ambient singletons: tests reset the fan-out
/// and limiter through this struct.
pub struct AppState {
  pub config: Config,
  pub store: SharedStore,
  pub clock: Arc<dyn Clock>,
  pub fanout: Arc<EventFanout>,
  pub resolver: KeyResolver,
  pub ledger: LedgerService,
  pub claims: ClaimService,
  pub jobs: JobService,
  pub api_key_limiter: RateLimiter,
}

impl AppState {
  pub fn build(config: Config, store: SqliteStore, clock: Arc<dyn Clock>) -> Self {
    let store = shared_store(store);
    let fanout = Arc::new(EventFanout::new());
    let resolver = KeyResolver::new(store.clone(), clock.clone());
    let ledger = LedgerService::new(
      store.clone(),
      fanout.clone(),
      clock.clone(),
      LedgerPolicy {
        default_claim_ttl_secs: config.default_claim_ttl_secs,
        max_claim_ttl_secs: config.max_claim_ttl_secs,
        wip_limit: config.wip_limit,
      },
    );
    let claims = ClaimService::new(store.clone(), clock.clone());
    let jobs = JobService::new(store.clone(), clock.clone(), config.job_ttl_secs);
    let api_key_limiter = RateLimiter::new(
      clock.clone(),
      Duration::seconds(config.api_key_window_secs as i64),
      config.api_key_max_per_window,
    );
    Self {
      config,
      store,
      clock,
      fanout,
      resolver,
      ledger,
      claims,
      jobs,
      api_key_limiter,
    }
  }
}

/// Handle to the running daemon.
pub struct DaemonHandle {
  task: JoinHandle<()>,
  local_addr: SocketAddr,
  shutdown_tx: watch::Sender<bool>,
  state: Arc<AppState>,
}

impl DaemonHandle {
  /// Signal the accept loop to stop and abort in-flight serving.
  pub fn stop(self) {
    let _ = self.shutdown_tx.send(true);
    self.task.abort();
  }

  pub async fn wait(self) {
    let _ = self.task.await;
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// The service container, mainly for tests that need to seed keys or
  /// reset limiters.
  pub fn state(&self) -> &Arc<AppState> {
    &self.state
  }
}

/// Bind the configured address and start serving. Port 0 in the config
/// picks an ephemeral port; read the bound address from the handle.
pub async fn start(state: AppState) -> io::Result<DaemonHandle> {
  let listener = TcpListener::bind(&state.config.bind).await?;
  let local_addr = listener.local_addr()?;
  let state = Arc::new(state);
  let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

  info!(event = "daemon_started", addr = %local_addr, "daemon server started");

  let loop_state = state.clone();
  let task = tokio::spawn(async move {
    loop {
      tokio::select! {
        _ = shutdown_rx.changed() => {
          info!(event = "daemon_shutdown", "shutdown signal received; stopping accept loop");
          break;
        }
        res = listener.accept() => {
          match res {
            Ok((stream, _addr)) => {
              let conn_state = loop_state.clone();
              tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                  let state = conn_state.clone();
                  async move {
                    Ok::<_, std::convert::Infallible>(router::handle(state, req).await)
                  }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                  error!(error = %e, "serve error");
                }
              });
            }
            Err(e) => {
              error!(error = %e, "accept error");
              break;
            }
          }
        }
      }
    }
    info!(event = "daemon_stopped", addr = %local_addr, "daemon server stopped");
  });

  Ok(DaemonHandle {
    task,
    local_addr,
    shutdown_tx,
    state,
  })
}
