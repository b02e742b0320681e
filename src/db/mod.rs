use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod repositories;
pub mod store;

use migrations::run_migrations;

pub use store::SqliteSettingsStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Close,
}

/// The thread that owns the connection. Dropping the last handle closes it
/// and waits for queued jobs to finish.
struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(thread) = thread else {
            return;
        };

        if self.requests.send(Request::Close).is_err() {
            warn!("database worker already gone at close");
        }
        if let Err(err) = thread.join() {
            error!("database worker panicked: {err:?}");
        }
    }
}

/// Handle to the preferences database. Jobs run one at a time, in submission
/// order, on the worker thread; that ordering is what serializes writes.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (requests, inbox) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("sleeplock-db".into())
            .spawn(move || match open_connection(&db_path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(conn, inbox);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before it was ready")??;

        Ok(Self {
            worker: Arc::new(Worker {
                requests,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Runs `job` against the connection and returns its result.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request::Run(Box::new(move |conn| {
            let _ = reply_tx.send(job(conn));
        }));

        self.worker
            .requests
            .send(request)
            .map_err(|_| anyhow!("database worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }

    /// Runs `job` inside one transaction; it commits only if `job` succeeds.
    pub async fn transaction<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open transaction")?;
            let value = job(&tx)?;
            tx.commit().context("failed to commit transaction")?;
            Ok(value)
        })
        .await
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    for (pragma, value) in [("journal_mode", "WAL"), ("synchronous", "FULL")] {
        if let Err(err) = conn.pragma_update(None, pragma, value) {
            warn!("could not set {pragma}={value}: {err}");
        }
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    info!("preferences database ready at {}", path.display());
    Ok(conn)
}

fn serve(mut conn: Connection, inbox: mpsc::Receiver<Request>) {
    for request in inbox {
        match request {
            Request::Run(job) => job(&mut conn),
            Request::Close => break,
        }
    }
    debug!("database worker stopped");
}
