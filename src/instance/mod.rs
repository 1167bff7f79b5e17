//! Single-instance coordination
//!
//! The first process to take the ownership token keeps running and listens on
//! a named notify signal; later launches set that signal and exit.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::InstanceEvent;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod win32;

#[cfg(unix)]
pub use unix::{LockToken, SocketListener, UnixPrimitives};
#[cfg(windows)]
pub use win32::{EventListener, MutexToken, WindowsPrimitives};

/// Errors from the named synchronization primitives
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os error {code}")]
    Os { code: i32 },

    #[error("failed to access the notify signal: {0}")]
    SignalAccess(String),

    #[error("malformed instance message: {0}")]
    Protocol(String),

    #[error("single-instance coordination is already initialized")]
    AlreadyInitialized,
}

/// Result of trying to take the ownership token without waiting
#[derive(Debug)]
pub enum Acquisition<T> {
    /// Taken; this process is the first instance
    Owned(T),
    /// Taken from a holder that died without releasing it
    Abandoned(T),
    /// Another live process holds it
    AlreadyHeld,
}

/// Held ownership of the instance token
///
/// Dropping the token releases it as well; `release` reports failures.
pub trait OwnershipToken: Send + 'static {
    fn release(self) -> Result<(), InstanceError>;
}

/// The first instance's end of the notify signal
pub trait SignalListener: Send + 'static {
    /// Wait until a later launch sets the signal
    ///
    /// Returns `None` once the signal can no longer fire.
    fn wait(&mut self) -> impl Future<Output = Option<InstanceEvent>> + Send;
}

/// Marks a set of primitives as taken by one live coordinator
///
/// Clones share the mark.
#[derive(Debug, Clone, Default)]
pub struct InitGuard(Arc<AtomicBool>);

impl InitGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<InitClaim, InstanceError> {
        if self.0.swap(true, Ordering::SeqCst) {
            return Err(InstanceError::AlreadyInitialized);
        }
        Ok(InitClaim(Arc::clone(&self.0)))
    }
}

/// Held by a coordinator; clears the mark when dropped
struct InitClaim(Arc<AtomicBool>);

impl Drop for InitClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Named system-wide primitives backing the coordinator
pub trait InstancePrimitives: Send + Sync + 'static {
    type Token: OwnershipToken;
    type Listener: SignalListener;

    /// Rejects a second coordinator on the same primitives
    fn init_guard(&self) -> &InitGuard;

    fn acquire_exclusive_or_detect_existing(
        &self,
        name: &str,
    ) -> Result<Acquisition<Self::Token>, InstanceError>;

    /// Create (or open) the notify signal as its listener
    fn create_signal(&self, name: &str) -> Result<Self::Listener, InstanceError>;

    /// Open the existing notify signal and set it
    fn signal_existing(&self, name: &str) -> Result<(), InstanceError>;
}

#[cfg(unix)]
pub type NativePrimitives = UnixPrimitives;
#[cfg(windows)]
pub type NativePrimitives = WindowsPrimitives;

/// Primitives for the current platform; `runtime_dir` holds Unix lock and socket files
#[cfg(unix)]
pub fn native_primitives(runtime_dir: &std::path::Path) -> NativePrimitives {
    UnixPrimitives::new(runtime_dir)
}

/// Primitives for the current platform; kernel objects need no directory
#[cfg(windows)]
pub fn native_primitives(_runtime_dir: &std::path::Path) -> NativePrimitives {
    WindowsPrimitives::default()
}

/// Whether this process won the ownership token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    First,
    Secondary,
}

impl std::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceRole::First => write!(f, "first"),
            InstanceRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// System-wide names for the ownership token and the notify signal
pub fn sync_names(identity: &str) -> (String, String) {
    let base: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    (format!("{}.instance", base), format!("{}.notify", base))
}

/// Decides first vs. secondary instance and relays later launches
pub struct InstanceCoordinator<P: InstancePrimitives> {
    role: InstanceRole,
    token: Option<P::Token>,
    cancel_tx: Option<watch::Sender<bool>>,
    wait_task: Option<JoinHandle<()>>,
    // Declared last so it is dropped after the token
    claim: Option<InitClaim>,
}

impl<P: InstancePrimitives> InstanceCoordinator<P> {
    /// Determine this process's role for `identity`
    ///
    /// The first instance starts a wait loop that sends an
    /// [`InstanceEvent`] on `event_tx` for every later launch. A secondary
    /// instance signals the first one (best effort) and should exit.
    /// Fails with [`InstanceError::AlreadyInitialized`] while another
    /// coordinator on the same primitives is alive. Must be called from
    /// within a tokio runtime.
    pub fn initialize(
        primitives: &P,
        identity: &str,
        event_tx: mpsc::Sender<InstanceEvent>,
    ) -> Result<Self, InstanceError> {
        let claim = primitives.init_guard().claim()?;
        let (token_name, signal_name) = sync_names(identity);

        let token = match primitives.acquire_exclusive_or_detect_existing(&token_name)? {
            Acquisition::Owned(token) => token,
            Acquisition::Abandoned(token) => {
                warn!(name = %token_name, "previous instance exited without releasing ownership");
                token
            }
            Acquisition::AlreadyHeld => {
                info!(identity, "another instance is running, notifying it");
                if let Err(e) = primitives.signal_existing(&signal_name) {
                    debug!(?e, "could not notify the running instance");
                }
                return Ok(Self {
                    role: InstanceRole::Secondary,
                    token: None,
                    cancel_tx: None,
                    wait_task: None,
                    claim: Some(claim),
                });
            }
        };

        let listener = primitives.create_signal(&signal_name)?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let wait_task = tokio::spawn(run_wait_loop(listener, cancel_rx, event_tx));

        info!(identity, "running as first instance");
        Ok(Self {
            role: InstanceRole::First,
            token: Some(token),
            cancel_tx: Some(cancel_tx),
            wait_task: Some(wait_task),
            claim: Some(claim),
        })
    }

    pub fn role(&self) -> InstanceRole {
        self.role
    }

    pub fn is_first_instance(&self) -> bool {
        self.role == InstanceRole::First
    }

    /// Stop listening and give up ownership
    ///
    /// The wait loop is cancelled and awaited before the signal is released,
    /// then the token is released. Afterwards the primitives accept a new
    /// `initialize`. Safe to call more than once.
    pub async fn dispose(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }

        if let Some(wait_task) = self.wait_task.take() {
            if let Err(e) = wait_task.await {
                warn!(?e, "instance wait loop ended abnormally");
            }
        }

        if let Some(token) = self.token.take() {
            match token.release() {
                Ok(()) => debug!("instance ownership released"),
                Err(e) => warn!(?e, "failed to release instance ownership"),
            }
        }

        self.claim = None;
    }
}

impl<P: InstancePrimitives> Drop for InstanceCoordinator<P> {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }
        if let Some(wait_task) = self.wait_task.take() {
            wait_task.abort();
        }
    }
}

/// Relay every wake of the notify signal until cancelled
async fn run_wait_loop<L: SignalListener>(
    mut listener: L,
    mut cancel_rx: watch::Receiver<bool>,
    event_tx: mpsc::Sender<InstanceEvent>,
) {
    debug!("instance wait loop started");

    loop {
        tokio::select! {
            biased;

            _ = cancel_rx.changed() => break,

            woke = listener.wait() => {
                let Some(event) = woke else {
                    debug!("notify signal closed");
                    break;
                };
                if *cancel_rx.borrow() {
                    break;
                }
                info!(%event, "second instance detected");
                if event_tx.send(event).await.is_err() {
                    debug!("instance event receiver dropped");
                    break;
                }
            }
        }
    }

    // The listener is dropped here, after the loop has stopped using it
    drop(listener);
    debug!("instance wait loop stopped");
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::Barrier;
    use tokio_test::{assert_pending, task};

    use super::*;

    /// Each `UnixPrimitives` over the shared directory stands in for one process
    fn launch(dir: &TempDir) -> UnixPrimitives {
        UnixPrimitives::new(dir.path())
    }

    #[test]
    fn test_sync_names() {
        let (token, signal) = sync_names("jp.instant/trigger");
        assert_eq!(token, "jp.instant_trigger.instance");
        assert_eq!(signal, "jp.instant_trigger.notify");
    }

    #[tokio::test]
    async fn test_first_then_secondary() {
        let dir = TempDir::new().unwrap();
        let (first_proc, second_proc) = (launch(&dir), launch(&dir));
        let (first_tx, mut first_rx) = mpsc::channel(8);
        let (second_tx, _second_rx) = mpsc::channel(8);

        let mut first = InstanceCoordinator::initialize(&first_proc, "app", first_tx).unwrap();
        assert_eq!(first.role(), InstanceRole::First);

        let second = InstanceCoordinator::initialize(&second_proc, "app", second_tx).unwrap();
        assert_eq!(second.role(), InstanceRole::Secondary);

        let event = tokio::time::timeout(Duration::from_secs(2), first_rx.recv())
            .await
            .expect("timed out waiting for second instance notification")
            .unwrap();
        assert_eq!(
            event,
            InstanceEvent::SecondInstanceStarted {
                pid: Some(std::process::id())
            }
        );

        first.dispose().await;
    }

    #[tokio::test]
    async fn test_second_initialize_in_process_fails_fast() {
        let dir = TempDir::new().unwrap();
        let primitives = launch(&dir);
        let (first_tx, mut first_rx) = mpsc::channel(8);
        let (again_tx, _again_rx) = mpsc::channel(8);

        let mut first = InstanceCoordinator::initialize(&primitives, "app", first_tx).unwrap();
        let again = InstanceCoordinator::initialize(&primitives, "app", again_tx);

        assert!(matches!(again, Err(InstanceError::AlreadyInitialized)));
        assert!(primitives.init_guard().is_claimed());

        // The rejected call must not have woken the first instance
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut next = task::spawn(first_rx.recv());
        assert_pending!(next.poll());

        first.dispose().await;
        assert!(!primitives.init_guard().is_claimed());
    }

    #[tokio::test]
    async fn test_secondary_also_holds_the_guard() {
        let dir = TempDir::new().unwrap();
        let (first_proc, second_proc) = (launch(&dir), launch(&dir));
        let (tx, _rx) = mpsc::channel(8);
        let mut first = InstanceCoordinator::initialize(&first_proc, "app", tx).unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let secondary = InstanceCoordinator::initialize(&second_proc, "app", tx).unwrap();
        assert!(!secondary.is_first_instance());

        let (tx, _rx) = mpsc::channel(8);
        let again = InstanceCoordinator::initialize(&second_proc, "app", tx);
        assert!(matches!(again, Err(InstanceError::AlreadyInitialized)));

        drop(secondary);
        assert!(!second_proc.init_guard().is_claimed());
        first.dispose().await;
    }

    #[tokio::test]
    async fn test_one_notification_per_secondary_launch() {
        let dir = TempDir::new().unwrap();
        let (first_tx, mut first_rx) = mpsc::channel(8);
        let mut first = InstanceCoordinator::initialize(&launch(&dir), "app", first_tx).unwrap();

        for _ in 0..3 {
            let (tx, _rx) = mpsc::channel(1);
            let secondary = InstanceCoordinator::initialize(&launch(&dir), "app", tx).unwrap();
            assert!(!secondary.is_first_instance());
        }

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), first_rx.recv())
                .await
                .expect("missing notification")
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut next = task::spawn(first_rx.recv());
        assert_pending!(next.poll());

        first.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_has_one_winner() {
        const LAUNCHES: usize = 4;
        let dir = TempDir::new().unwrap();
        let barrier = Arc::new(Barrier::new(LAUNCHES));

        let launches: Vec<_> = (0..LAUNCHES)
            .map(|_| {
                let primitives = launch(&dir);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    let (tx, rx) = mpsc::channel(8);
                    barrier.wait().await;
                    let coordinator = InstanceCoordinator::initialize(&primitives, "race", tx).unwrap();
                    (coordinator, rx)
                })
            })
            .collect();

        let mut coordinators = Vec::new();
        for launch in launches {
            coordinators.push(launch.await.unwrap());
        }

        let firsts = coordinators
            .iter()
            .filter(|(c, _)| c.is_first_instance())
            .count();
        assert_eq!(firsts, 1);

        for (coordinator, _) in coordinators.iter_mut() {
            coordinator.dispose().await;
        }
    }

    #[tokio::test]
    async fn test_dispose_allows_new_first_instance() {
        let dir = TempDir::new().unwrap();
        let primitives = launch(&dir);
        let (tx, _rx) = mpsc::channel(8);
        let mut first = InstanceCoordinator::initialize(&primitives, "app", tx).unwrap();

        first.dispose().await;
        first.dispose().await;

        let (tx, _rx) = mpsc::channel(8);
        let mut next = InstanceCoordinator::initialize(&primitives, "app", tx).unwrap();
        assert_eq!(next.role(), InstanceRole::First);
        next.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_leaves_clean_lock() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let mut first = InstanceCoordinator::initialize(&launch(&dir), "app", tx).unwrap();
        first.dispose().await;

        let (token_name, _) = sync_names("app");
        let next = launch(&dir)
            .acquire_exclusive_or_detect_existing(&token_name)
            .unwrap();
        assert!(matches!(next, Acquisition::Owned(_)));
    }

    #[tokio::test]
    async fn test_dropped_owner_is_not_a_lockout() {
        let dir = TempDir::new().unwrap();
        {
            let (tx, _rx) = mpsc::channel(8);
            let first = InstanceCoordinator::initialize(&launch(&dir), "app", tx).unwrap();
            assert!(first.is_first_instance());
            // Dropped without dispose, as in a crash
        }

        let (tx, _rx) = mpsc::channel(8);
        let mut next = InstanceCoordinator::initialize(&launch(&dir), "app", tx).unwrap();
        assert!(next.is_first_instance());
        next.dispose().await;
    }

    #[tokio::test]
    async fn test_secondary_without_listener_is_silent() {
        let dir = TempDir::new().unwrap();
        let holder = launch(&dir);
        let (token_name, _) = sync_names("app");
        let _held = match holder.acquire_exclusive_or_detect_existing(&token_name).unwrap() {
            Acquisition::Owned(token) => token,
            _ => panic!("expected a fresh token"),
        };

        let (tx, _rx) = mpsc::channel(8);
        let secondary = InstanceCoordinator::initialize(&launch(&dir), "app", tx).unwrap();
        assert_eq!(secondary.role(), InstanceRole::Secondary);
    }
}
