//! Process lifecycle: OS signals and fatal task errors both funnel into one
//! cancellation token; `wind_down` then tears the session down in order.

use std::fmt;
use std::future::Future;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::{Session, SessionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// SIGINT / SIGTERM.
    Interrupted(&'static str),
    Fatal(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Interrupted(signal) => write!(f, "Interrupted by {}", signal),
            ExitReason::Fatal(message) => write!(f, "Error: {}", message),
        }
    }
}

impl ExitReason {
    /// Both an interrupt and a fatal error exit with status 1.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(1)
    }
}

#[derive(Clone, Default)]
pub struct Lifecycle {
    cancel: CancellationToken,
    reason: Arc<OnceLock<ExitReason>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The first reason wins; later ones are only logged.
    pub fn shut_down(&self, reason: ExitReason) {
        if let Err(later) = self.reason.set(reason) {
            debug!("lifecycle: already shutting down, ignoring {}", later);
        } else if let Some(reason) = self.reason() {
            info!("Shutting down: {}", reason);
        }
        self.cancel.cancel();
    }

    pub fn fail(&self, err: impl fmt::Display) {
        error!("{}", err);
        self.shut_down(ExitReason::Fatal(err.to_string()));
    }

    pub fn reason(&self) -> Option<&ExitReason> {
        self.reason.get()
    }

    /// Wrap a task so an error from it shuts the process down.
    pub fn guard<F, E>(&self, name: &'static str, task: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        let lifecycle = self.clone();
        async move {
            match task.await {
                Ok(()) => debug!("lifecycle: {} finished", name),
                Err(e) => lifecycle.fail(format!("{}: {}", name, e)),
            }
        }
    }

    /// Waits for SIGINT (and SIGTERM on unix) for the life of the process.
    pub async fn listen_for_signals(self) -> std::io::Result<()> {
        let signal = wait_for_signal().await?;
        self.shut_down(ExitReason::Interrupted(signal));
        Ok(())
    }

    /// Cancel the driver's wait and let it return, give the engine a final
    /// stop, release it, then stop the remaining tasks.
    pub async fn wind_down(
        &self,
        session: &Session,
        driver: JoinHandle<()>,
        mut tasks: JoinSet<()>,
    ) -> ExitCode {
        self.cancel.cancel();

        if let Err(e) = driver.await {
            warn!("driver task ended abnormally: {}", e);
        }
        match session.shutdown().await {
            Ok(()) | Err(SessionError::Released) => {}
            Err(e) => error!("engine shutdown failed: {}", e),
        }
        tasks.shutdown().await;

        match self.reason() {
            Some(reason) => {
                println!("{}", reason);
                reason.exit_code()
            }
            None => ExitCode::SUCCESS,
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::engine::testing::{Call, RecordingEngine};
    use crate::gateway::testing::{chunk, ScriptedSource};
    use crate::gateway::AccessToken;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let lifecycle = Lifecycle::new();
        lifecycle.shut_down(ExitReason::Interrupted("SIGTERM"));
        lifecycle.fail("late failure");
        assert_eq!(lifecycle.reason(), Some(&ExitReason::Interrupted("SIGTERM")));
        assert!(lifecycle.token().is_cancelled());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            ExitReason::Fatal("audio token not found".into()).to_string(),
            "Error: audio token not found"
        );
        assert_eq!(
            ExitReason::Interrupted("SIGINT").to_string(),
            "Interrupted by SIGINT"
        );
    }

    #[tokio::test]
    async fn test_guard_turns_error_into_shutdown() {
        let lifecycle = Lifecycle::new();
        lifecycle
            .guard("hotkeys", async { Err::<(), _>("stdin closed badly") })
            .await;
        assert_eq!(
            lifecycle.reason(),
            Some(&ExitReason::Fatal("hotkeys: stdin closed badly".into()))
        );

        let quiet = Lifecycle::new();
        quiet.guard("ok", async { Ok::<(), String>(()) }).await;
        assert!(quiet.reason().is_none());
        assert!(!quiet.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wind_down_stops_then_releases() {
        let engine = RecordingEngine::new();
        let source = ScriptedSource::new(vec![chunk(42, &[300.0], 1)]);
        let session = Arc::new(Session::new(
            Arc::new(engine.clone()),
            Arc::new(source),
            42,
            AccessToken::new("initial"),
        ));
        let lifecycle = Lifecycle::new();

        let driver = Driver::new(Arc::clone(&session), lifecycle.token());
        let driver = tokio::spawn(lifecycle.guard("driver", driver.run()));
        let mut tasks = JoinSet::new();
        tasks.spawn(std::future::pending::<()>());

        tokio::time::sleep(Duration::from_secs(10)).await;
        lifecycle.shut_down(ExitReason::Interrupted("SIGINT"));
        let code = lifecycle.wind_down(&session, driver, tasks).await;

        assert_eq!(code, ExitCode::from(1));
        let calls = engine.calls();
        assert_eq!(&calls[calls.len() - 2..], &[Call::Stop, Call::Release]);
        assert_eq!(engine.count(|c| matches!(c, Call::Load(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_driver_error_winds_down() {
        let engine = RecordingEngine::new();
        let source = ScriptedSource::new(vec![chunk(42, &[1.0], 1)]);
        source.fail_tokens();
        let session = Arc::new(Session::new(
            Arc::new(engine.clone()),
            Arc::new(source),
            42,
            AccessToken::new("initial"),
        ));
        let lifecycle = Lifecycle::new();
        let driver = Driver::new(Arc::clone(&session), lifecycle.token());
        let driver = tokio::spawn(lifecycle.guard("driver", driver.run()));

        lifecycle.cancelled().await;
        assert!(matches!(lifecycle.reason(), Some(ExitReason::Fatal(_))));
        lifecycle.wind_down(&session, driver, JoinSet::new()).await;
        assert_eq!(engine.calls().last(), Some(&Call::Release));
    }
}
