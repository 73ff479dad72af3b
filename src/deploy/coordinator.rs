//! Single-flight gate in front of the executor.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use super::context::DeployContext;
use super::executor::{DeployJob, RemoteExecutor};
use super::status::RunState;
use super::transport::Connector;
use super::{DeployError, RunOutcome};

/// Accepts deployment requests and launches at most one run at a time.
///
/// Cheap to clone; all clones share the same context and executor.
#[derive(Clone)]
pub struct Deployer {
    ctx: Arc<DeployContext>,
    executor: Arc<RemoteExecutor>,
}

impl Deployer {
    pub fn new(ctx: Arc<DeployContext>, connector: Arc<dyn Connector>, job: DeployJob) -> Self {
        let executor = Arc::new(RemoteExecutor::new(ctx.clone(), connector, job));
        Self { ctx, executor }
    }

    pub fn context(&self) -> &Arc<DeployContext> {
        &self.ctx
    }

    pub fn job(&self) -> &DeployJob {
        self.executor.job()
    }

    pub fn status(&self) -> RunState {
        self.ctx.snapshot()
    }

    /// Start a deployment in the background and return immediately.
    ///
    /// Fails with [`DeployError::AlreadyRunning`] without touching any state
    /// if a run is in flight. The returned handle may be dropped; the run
    /// continues detached. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<JoinHandle<RunOutcome>, DeployError> {
        self.ctx.begin_run()?;
        info!(remote = %self.executor.job().target, "deployment started");

        let executor = self.executor.clone();
        Ok(tokio::task::spawn_blocking(move || executor.run()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::transport::{RemoteChannel, RemoteSession, SshTarget, TransportError};
    use crate::deploy::{LogLevel, RunFailure};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use zeroize::Zeroizing;

    /// Remote that holds the command open until the test releases it.
    struct GatedConnector {
        release: Mutex<Option<mpsc::Receiver<i32>>>,
    }

    impl Connector for GatedConnector {
        fn connect(&self, _target: &SshTarget) -> Result<Box<dyn RemoteSession>, TransportError> {
            let rx = self.release.lock().unwrap().take();
            Ok(Box::new(GatedSession { rx }))
        }
    }

    struct GatedSession {
        rx: Option<mpsc::Receiver<i32>>,
    }

    impl RemoteSession for GatedSession {
        fn authenticate(&mut self, _: &str, _: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn exec_pty(&mut self, _: &str) -> Result<Box<dyn RemoteChannel>, TransportError> {
            Ok(Box::new(GatedChannel {
                rx: self.rx.take(),
                code: 0,
            }))
        }

        fn close(&mut self) {}
    }

    struct GatedChannel {
        rx: Option<mpsc::Receiver<i32>>,
        code: i32,
    }

    impl RemoteChannel for GatedChannel {
        fn read_line(&mut self) -> Result<Option<String>, TransportError> {
            if let Some(rx) = self.rx.take() {
                self.code = rx.recv().unwrap_or(0);
                return Ok(Some("released".to_string()));
            }
            Ok(None)
        }

        fn read_stderr(&mut self) -> Result<String, TransportError> {
            Ok(String::new())
        }

        fn exit_status(&mut self) -> Result<i32, TransportError> {
            Ok(self.code)
        }
    }

    fn deployer() -> (Deployer, mpsc::Sender<i32>) {
        let (tx, rx) = mpsc::channel();
        let connector = Arc::new(GatedConnector {
            release: Mutex::new(Some(rx)),
        });
        let job = DeployJob {
            target: SshTarget {
                host: "127.0.0.1".into(),
                port: 22,
                connect_timeout: Duration::from_secs(30),
            },
            username: "ops".into(),
            password: Zeroizing::new("secret".into()),
            path: "/srv/app".into(),
            script: "./deploy.sh".into(),
        };
        (
            Deployer::new(Arc::new(DeployContext::new()), connector, job),
            tx,
        )
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_running() {
        let (deployer, release) = deployer();

        let handle = assert_ok!(deployer.start());
        assert!(deployer.status().running);
        let started_at = deployer.status().start_time;

        assert!(matches!(
            assert_err!(deployer.start()),
            DeployError::AlreadyRunning
        ));
        assert_eq!(deployer.status().start_time, started_at);

        release.send(7).unwrap();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome, Err(RunFailure::Command(7)));

        let state = deployer.status();
        assert!(!state.running);
        assert_eq!(state.error.as_deref(), Some("script exited with code 7"));
        assert_eq!(state.start_time, started_at);
    }

    #[tokio::test]
    async fn test_start_returns_before_run_completes() {
        let (deployer, release) = deployer();
        let handle = deployer.start().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(deployer.status().running);

        release.send(0).unwrap();
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert!(deployer.status().success);
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_exactly_one() {
        let (deployer, release) = deployer();

        let mut attempts = Vec::new();
        for _ in 0..16 {
            let d = deployer.clone();
            attempts.push(tokio::spawn(async move { d.start() }));
        }

        let mut handles = Vec::new();
        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(handle) => handles.push(handle),
                Err(DeployError::AlreadyRunning) => rejected += 1,
            }
        }
        assert_eq!(handles.len(), 1);
        assert_eq!(rejected, 15);

        release.send(0).unwrap();
        handles.pop().unwrap().await.unwrap().unwrap();
        assert!(!deployer.status().running);
    }

    #[tokio::test]
    async fn test_new_run_starts_with_clean_bus() {
        let (deployer, release) = deployer();
        release.send(0).unwrap();
        deployer.start().unwrap().await.unwrap().unwrap();
        assert!(!deployer.context().bus.is_empty());

        // The gated connector is spent; the next run connects without a gate.
        deployer.start().unwrap().await.unwrap().unwrap();
        let first = deployer.context().bus.try_consume().unwrap();
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.message, "Starting deployment");
    }
}
