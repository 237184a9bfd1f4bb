// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for polling until a condition is true
//!
//! Every blocking step of a failover run (waiting for a single master agent,
//! waiting for ping, waiting for sshd) uses the same pattern: check at a fixed
//! interval until the check succeeds, fails permanently, or a hard deadline
//! passes.  There is no backoff.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Result of one attempt to check a condition (see [`wait_for_condition()`])
#[derive(Debug, Error)]
pub enum CondCheckError<E> {
    /// the condition we're waiting for is not true
    #[error("poll condition not yet ready")]
    NotYet,
    #[error("non-retryable error while polling on condition")]
    Failed(#[from] E),
}

/// Error returned by [`wait_for_condition()`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error<E> {
    /// operation timed out before succeeding or failing permanently
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("non-retryable error while polling on condition")]
    PermanentError(E),
}

/// Poll the given closure until it succeeds, returns a permanent error, or
/// a given time has expired
///
/// This is intended only for testing and for tools that wait on a remote
/// system with no way to be notified of the change.  The closure is always
/// invoked at least once.
pub async fn wait_for_condition<O, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<O, Error<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<O, CondCheckError<E>>>,
{
    let poll_start = Instant::now();
    loop {
        match cond().await {
            Ok(output) => return Ok(output),
            Err(CondCheckError::Failed(e)) => {
                return Err(Error::PermanentError(e));
            }
            Err(CondCheckError::NotYet) => (),
        }

        let duration = Instant::now().duration_since(poll_start);
        if duration >= *poll_max {
            return Err(Error::TimedOut(duration));
        }

        tokio::time::sleep(*poll_interval).await;
    }
}
