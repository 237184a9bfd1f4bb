// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named, timed steps of a failover run

use serde::Serialize;
use slog::info;
use slog::Logger;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How long one named step took and whether it succeeded
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AtomicAction {
    pub name: String,
    pub duration: Duration,
    pub succeeded: bool,
}

/// Records steps in the order they finish
#[derive(Debug, Default)]
pub struct AtomicActions {
    actions: Vec<AtomicAction>,
}

impl AtomicActions {
    pub fn new() -> AtomicActions {
        AtomicActions::default()
    }

    /// Runs `fut`, recording its duration under `name` whether or not it
    /// fails
    pub async fn time<T, E, F>(
        &mut self,
        log: &Logger,
        name: &str,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let duration = start.elapsed();
        let succeeded = result.is_ok();
        info!(log, "atomic action finished";
            "action" => name,
            "duration" => ?duration,
            "succeeded" => succeeded,
        );
        self.actions.push(AtomicAction {
            name: name.to_string(),
            duration,
            succeeded,
        });
        result
    }

    pub fn actions(&self) -> &[AtomicAction] {
        &self.actions
    }
}
