//! Playback loop: fetch a chunk, play each track for its nominal duration of
//! running time, refresh the token in the background, repeat.

use rrply_proto::protocol::PlaybackStatus;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::countdown::{Countdown, Outcome};
use crate::session::{Session, SessionError};

type Refreshes = JoinSet<Result<(), SessionError>>;

pub struct Driver {
    session: Arc<Session>,
    countdown: Countdown,
    cancel: CancellationToken,
}

impl Driver {
    pub fn new(session: Arc<Session>, cancel: CancellationToken) -> Self {
        Self {
            session,
            countdown: Countdown::default(),
            cancel,
        }
    }

    /// Runs until cancelled (`Ok`) or until a fetch, token refresh or engine
    /// command fails (`Err`).
    pub async fn run(self) -> Result<(), SessionError> {
        let mut refreshes = Refreshes::new();

        loop {
            if self.session.chunk_finished().await {
                let session = Arc::clone(&self.session);
                refreshes.spawn(async move { session.refresh_token().await });
                debug!("driver: chunk done, token refresh spawned");
            }

            let track = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                err = refresh_failure(&mut refreshes) => return Err(err),
                next = self.session.advance() => next?,
            };

            self.session.stop().await?;
            println!("{}", track);
            info!("Track {}: {} - {}", track.id, track.artist, track.title);

            let status = self.session.subscribe();
            let wait = self.countdown.run(
                track.duration_secs(),
                || *status.borrow() == PlaybackStatus::Playing,
                &self.cancel,
            );
            let play = self.session.load_track(&track);
            tokio::pin!(wait, play);

            let mut started = false;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut wait => break outcome,
                    loaded = &mut play, if !started => {
                        started = true;
                        loaded?;
                    }
                    err = refresh_failure(&mut refreshes) => return Err(err),
                }
            };

            match outcome {
                Outcome::Cancelled { played } => {
                    if !started {
                        // Let the load settle so nothing reaches the engine after release
                        let _ = play.await;
                    }
                    debug!("driver: cancelled after {}s of track {}", played, track.id);
                    return Ok(());
                }
                Outcome::Elapsed { played, waited } => {
                    if !started {
                        play.await?;
                    }
                    debug!(
                        "driver: track {} done, {}s played over {}s",
                        track.id, played, waited
                    );
                }
            }
        }
    }
}

/// Resolves with the first failed refresh; pending forever otherwise.
async fn refresh_failure(refreshes: &mut Refreshes) -> SessionError {
    loop {
        match refreshes.join_next().await {
            Some(Ok(Ok(()))) => continue,
            Some(Ok(Err(e))) => return e,
            Some(Err(e)) => resume_panic(e),
            None => std::future::pending::<()>().await,
        }
    }
}

fn resume_panic(e: JoinError) {
    if e.is_panic() {
        std::panic::resume_unwind(e.into_panic());
    }
}
