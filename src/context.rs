//! The process context: the one struct every component entry point
//! receives instead of reaching for a global (§2, §9 "Global mutable
//! singletons ... treat as a Process Context struct").

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::Backend;
use crate::config::MascConfig;
use crate::session::SessionRegistry;

/// Threads the storage backend, the session registry, and resolved
/// configuration through every MASC component. Owned by the
/// coordinator's entry point; there is no global/static instance.
pub struct ProcessContext {
    /// The storage backend selected by configuration/auto-detection.
    pub backend: Arc<Backend>,
    /// The process-wide agent session registry.
    pub sessions: Arc<SessionRegistry>,
    /// Resolved configuration this context was built from.
    pub config: MascConfig,
}

impl ProcessContext {
    /// Build a context rooted at `base_path`: reads environment
    /// configuration, initializes the `tracing` subscriber, and
    /// constructs the configured storage backend.
    pub async fn init(base_path: impl Into<PathBuf>) -> Self {
        let config = MascConfig::from_env(base_path.into());
        config.init_tracing();
        let backend = config.build_backend().await;
        Self {
            backend: Arc::new(backend),
            sessions: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    /// A lightweight context for tests: in-memory backend, no
    /// environment reads, no subscriber installed.
    pub fn for_test() -> Self {
        Self {
            backend: Arc::new(Backend::memory()),
            sessions: Arc::new(SessionRegistry::new()),
            config: MascConfig::from_env(PathBuf::from(".")),
        }
    }

    /// Discard all session state, keeping the same backend and config.
    /// Used between test cases that want a clean registry without
    /// re-reading the environment.
    pub fn reset_sessions(&mut self) {
        self.sessions = Arc::new(SessionRegistry::new());
    }
}
