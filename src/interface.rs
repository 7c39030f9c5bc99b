//! Running blocking session work from asynchronous code.
//!
//! Backends do blocking file and database I/O. The functions here move that
//! work onto tokio's blocking thread pool so that an async caller is not held
//! up while a store is loaded or a commit is written. An in-flight persist is
//! not cancellable: dropping the returned future does not stop the write.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::commit::CommitReport;
use crate::context::SessionHandle;
use crate::error::{CudsError, Result};
use crate::ontology::Ontology;
use crate::session::Session;
use crate::wrapper::Backend;

async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CudsError::Persistence(format!("Blocking task failed: {}", e)))?
}

/// Commits the session on the blocking thread pool.
pub async fn commit_blocking(handle: SessionHandle) -> Result<CommitReport> {
    blocking(move || {
        let mut session = handle.lock()?;
        debug!(location = session.location(), "committing off the async runtime");
        session.commit()
    })
    .await
}

/// Opens (and loads) a session on the blocking thread pool.
pub async fn open_blocking(
    ontology: Arc<Ontology>,
    backend: Backend,
    location: PathBuf,
    create: bool,
) -> Result<SessionHandle> {
    blocking(move || Ok(SessionHandle::new(Session::open(ontology, backend, location, create)?))).await
}
