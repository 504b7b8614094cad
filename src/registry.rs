//! Maps published writer handles to stable small integer indices.
//!
//! Mirrors the single-writer bookkeeping the teacher crate does for queue
//! segments (`core::Queue`), generalized from one queue to a registry of
//! many journals published before the server starts.

use std::sync::{Arc, Mutex};

use crate::bridge::PayloadDescriptor;

/// Sentinel returned by [`WriterRegistry::resolve`] when a key is unknown.
pub const NOT_FOUND: i32 = -1;

/// `(id, location)` pair identifying a journal. A missing `location` only
/// matches another missing `location`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JournalKey {
    pub id: String,
    pub location: Option<String>,
}

impl JournalKey {
    pub fn new(id: impl Into<String>, location: Option<String>) -> Self {
        Self {
            id: id.into(),
            location,
        }
    }
}

/// Stable non-negative index assigned once per published writer.
pub type WriterIndex = u32;

/// Callback a [`Writer`] invokes once per commit, with the monotonic
/// per-writer sequence number and the committed payload. The caller that
/// installs the listener (`Server::start`) is the one who knows this
/// writer's assigned index, and tags the event with it before handing it
/// to the bridge (spec §4.H start step 2).
pub type CommitListener = Arc<dyn Fn(u64, PayloadDescriptor) + Send + Sync>;

/// External collaborator: the local journal writer whose commits feed the
/// [`crate::bridge::EventBridge`] (spec §2 component A). The wire codec
/// that produces each commit's `PayloadDescriptor` is out of scope (spec
/// §1 Non-goals); this trait is only the seam a writer implementation
/// plugs into.
pub trait Writer: Send + Sync {
    /// Installs `listener`, replacing any previously installed one.
    /// Called once per writer from `Server::start` (spec §4.H step 2).
    fn install_commit_listener(&self, listener: CommitListener);

    /// Removes the listener installed by `install_commit_listener`, if
    /// any, so further commits are not observed. Called once per writer
    /// from `Server::halt` before the listening socket is closed (spec
    /// §4.H halt step 3; §9 "commit callbacks pushing into a bridge while
    /// writers may be halted").
    fn detach_commit_listener(&self);
}

/// No-op `Writer` for tests and the CLI's placeholder `Server<()>` — it
/// never commits, so installing or detaching a listener is a no-op.
impl Writer for () {
    fn install_commit_listener(&self, _listener: CommitListener) {}
    fn detach_commit_listener(&self) {}
}

/// A handle to an externally-owned writer plus its assigned index.
///
/// The attached commit-event publisher is installed at `Server::start` and
/// cleared at `Server::halt`; see [`crate::bridge::EventBridge`].
pub struct PublishedWriter<W> {
    pub key: JournalKey,
    pub index: WriterIndex,
    pub writer: W,
}

struct Inner<W> {
    writers: Vec<PublishedWriter<W>>,
    started: bool,
}

/// Registry of published writers, keyed for wire-stable resolution.
///
/// Populated only before [`crate::server::Server::start`]; read-only
/// afterwards (spec §5 "shared resource policy").
pub struct WriterRegistry<W> {
    inner: Mutex<Inner<W>>,
}

impl<W> Default for WriterRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> WriterRegistry<W> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                writers: Vec::new(),
                started: false,
            }),
        }
    }

    /// Publishes a writer under `key`, assigning it the next index.
    ///
    /// Must be called before `start`; calling it afterwards is rejected
    /// rather than silently hot-added or left undefined (spec §9 open
    /// question, resolved in DESIGN.md).
    pub fn publish(&self, key: JournalKey, writer: W) -> Result<WriterIndex, PublishAfterStart> {
        let mut inner = self.inner.lock().unwrap();
        if inner.started {
            return Err(PublishAfterStart);
        }
        let index = inner.writers.len() as WriterIndex;
        inner.writers.push(PublishedWriter { key, index, writer });
        Ok(index)
    }

    /// Resolves a key to its assigned index, or [`NOT_FOUND`].
    ///
    /// Iteration order is not contractual; this is a linear scan applying
    /// `JournalKey` equality.
    pub fn resolve(&self, key: &JournalKey) -> i32 {
        let inner = self.inner.lock().unwrap();
        inner
            .writers
            .iter()
            .find(|pw| &pw.key == key)
            .map(|pw| pw.index as i32)
            .unwrap_or(NOT_FOUND)
    }

    /// Marks the registry read-only; called once from `Server::start`.
    pub fn seal(&self) {
        self.inner.lock().unwrap().started = true;
    }

    /// Snapshot of every published writer's index, used by `Server::start`
    /// and `Server::halt` to install/detach a bridge commit listener on
    /// each one in turn.
    pub fn indices(&self) -> Vec<WriterIndex> {
        let inner = self.inner.lock().unwrap();
        inner.writers.iter().map(|pw| pw.index).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` against the writer at `index`, if published. Used by
    /// `Server::start` to attach a commit listener without cloning `W`.
    pub fn with_writer<R>(&self, index: WriterIndex, f: impl FnOnce(&W) -> R) -> Option<R> {
        let inner = self.inner.lock().unwrap();
        inner
            .writers
            .iter()
            .find(|pw| pw.index == index)
            .map(|pw| f(&pw.writer))
    }
}

/// Returned by [`WriterRegistry::publish`] when called after `seal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAfterStart;

impl std::fmt::Display for PublishAfterStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish() called after the server was started")
    }
}

impl std::error::Error for PublishAfterStart {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_matches_publish_order() {
        let registry: WriterRegistry<()> = WriterRegistry::new();
        let k0 = JournalKey::new("orders", None);
        let k1 = JournalKey::new("orders", Some("us-east".into()));
        let i0 = registry.publish(k0.clone(), ()).unwrap();
        let i1 = registry.publish(k1.clone(), ()).unwrap();
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
        assert_eq!(registry.resolve(&k0), 0);
        assert_eq!(registry.resolve(&k1), 1);
    }

    #[test]
    fn resolve_unknown_key_is_not_found() {
        let registry: WriterRegistry<()> = WriterRegistry::new();
        registry.publish(JournalKey::new("a", None), ()).unwrap();
        let missing = JournalKey::new("b", None);
        assert_eq!(registry.resolve(&missing), NOT_FOUND);
    }

    #[test]
    fn absent_location_only_matches_absent_location() {
        let registry: WriterRegistry<()> = WriterRegistry::new();
        registry
            .publish(JournalKey::new("orders", Some("eu".into())), ())
            .unwrap();
        let absent = JournalKey::new("orders", None);
        assert_eq!(registry.resolve(&absent), NOT_FOUND);
    }

    #[test]
    fn publish_after_seal_is_rejected() {
        let registry: WriterRegistry<()> = WriterRegistry::new();
        registry.seal();
        let err = registry.publish(JournalKey::new("x", None), ());
        assert!(err.is_err());
    }
}
