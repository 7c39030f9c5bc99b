//! Which session is active.
//!
//! Every thread keeps a stack of entered sessions. [`Session::enter`] pushes
//! a handle and returns a [`SessionGuard`] that removes exactly that entry
//! again when dropped, so the previous session becomes active on every way out
//! of a scope, unwinding included. Guards dropped out of order leave the
//! entries of live guards in place. When nothing is entered, the process-wide default session is
//! active. The free functions of this module act on whatever session is active.

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Mutex, MutexGuard};

use lazy_static::lazy_static;
use tracing::debug;

use crate::commit::CommitReport;
use crate::construct::{Object, Uid};
use crate::datatype::Literal;
use crate::error::{CudsError, Result};
use crate::ontology::Ontology;
use crate::session::Session;

/// A session shared between threads and scopes.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }
    pub fn lock(&self) -> Result<MutexGuard<'_, Session>> {
        self.0.lock().map_err(|e| CudsError::Lock(e.to_string()))
    }
    pub fn same_as(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl From<Session> for SessionHandle {
    fn from(session: Session) -> Self {
        Self::new(session)
    }
}

thread_local! {
    static ENTERED: RefCell<Vec<(u64, SessionHandle)>> = const { RefCell::new(Vec::new()) };
    static NEXT_TOKEN: Cell<u64> = const { Cell::new(0) };
}

lazy_static! {
    static ref DEFAULT_SESSION: Mutex<Option<SessionHandle>> = Mutex::new(None);
}

/// Keeps a session active until dropped.
#[must_use = "the session is only active while the guard is alive"]
pub struct SessionGuard {
    handle: SessionHandle,
    token: u64,
}
impl SessionGuard {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}
impl Drop for SessionGuard {
    fn drop(&mut self) {
        // try_with, since the thread local may already be gone at thread exit
        let _ = ENTERED.try_with(|entered| {
            let mut entered = entered.borrow_mut();
            if let Some(at) = entered.iter().rposition(|(token, _)| *token == self.token) {
                entered.remove(at);
            }
        });
        debug!(token = self.token, "session exited");
    }
}

impl Session {
    /// Makes the session active on this thread until the guard is dropped.
    pub fn enter(handle: &SessionHandle) -> SessionGuard {
        let token = NEXT_TOKEN.with(|next| {
            let token = next.get();
            next.set(token + 1);
            token
        });
        let depth = ENTERED.with(|entered| {
            let mut entered = entered.borrow_mut();
            entered.push((token, handle.clone()));
            entered.len()
        });
        debug!(token, depth, "session entered");
        SessionGuard { handle: handle.clone(), token }
    }
}

/// Replaces the default session with an empty in-memory one.
pub fn init_default(ontology: Arc<Ontology>) -> Result<SessionHandle> {
    let handle = SessionHandle::new(Session::new(ontology));
    let mut default = DEFAULT_SESSION
        .lock()
        .map_err(|e| CudsError::Lock(e.to_string()))?;
    *default = Some(handle.clone());
    Ok(handle)
}

/// The default session, created with an empty ontology on first use.
pub fn default_session() -> Result<SessionHandle> {
    let mut default = DEFAULT_SESSION
        .lock()
        .map_err(|e| CudsError::Lock(e.to_string()))?;
    if let Some(handle) = default.as_ref() {
        return Ok(handle.clone());
    }
    let handle = SessionHandle::new(Session::new(Arc::new(Ontology::builder().build()?)));
    *default = Some(handle.clone());
    Ok(handle)
}

/// The innermost entered session of this thread, or the default session.
pub fn current() -> Result<SessionHandle> {
    match ENTERED.with(|entered| entered.borrow().last().map(|(_, handle)| handle.clone())) {
        Some(handle) => Ok(handle),
        None => default_session(),
    }
}

/// Runs `f` on the active session.
pub fn with_current<R>(f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
    let handle = current()?;
    let mut session = handle.lock()?;
    f(&mut session)
}

pub fn create(class: &str, attributes: &[(&str, Literal)]) -> Result<Uid> {
    with_current(|session| session.create(class, attributes))
}
pub fn create_with_classes(classes: &[&str], attributes: &[(&str, Literal)]) -> Result<Uid> {
    with_current(|session| session.create_with_classes(classes, attributes))
}
pub fn add_triple(subject: Uid, predicate: &str, object: impl Into<Object>) -> Result<bool> {
    with_current(|session| session.add_triple(subject, predicate, object))
}
pub fn remove_triple(subject: Uid, predicate: &str, object: impl Into<Object>) -> Result<bool> {
    with_current(|session| Ok(session.remove_triple(subject, predicate, object)))
}
pub fn remove_individual(uid: Uid) -> Result<bool> {
    with_current(|session| Ok(session.remove_individual(uid)))
}
pub fn commit() -> Result<CommitReport> {
    with_current(|session| session.commit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;

    fn ontology() -> Arc<Ontology> {
        Arc::new(
            Ontology::builder()
                .class("city.City", &[])
                .attribute("city.name", Datatype::String)
                .build()
                .expect("ontology"),
        )
    }

    #[test]
    fn nested_scopes_restore_the_outer_session() {
        let outer = SessionHandle::new(Session::new(ontology()));
        let inner = SessionHandle::new(Session::new(ontology()));
        let _outer_guard = Session::enter(&outer);
        {
            let _inner_guard = Session::enter(&inner);
            assert!(current().unwrap().same_as(&inner));
            create("city.City", &[]).unwrap();
        }
        assert!(current().unwrap().same_as(&outer));
        assert_eq!(outer.lock().unwrap().individuals().count(), 0);
        assert_eq!(inner.lock().unwrap().individuals().count(), 1);
    }

    #[test]
    fn dropping_an_outer_guard_first_keeps_the_inner_scope() {
        let outer = SessionHandle::new(Session::new(ontology()));
        let inner = SessionHandle::new(Session::new(ontology()));
        let outer_guard = Session::enter(&outer);
        let inner_guard = Session::enter(&inner);
        drop(outer_guard);
        assert!(current().unwrap().same_as(&inner));
        let city = create("city.City", &[]).unwrap();
        assert!(inner.lock().unwrap().contains(city));
        drop(inner_guard);
        assert!(!current().unwrap().same_as(&inner));
        assert!(!current().unwrap().same_as(&outer));
    }
}
