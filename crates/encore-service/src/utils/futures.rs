use std::future::Future;

use tokio::time::Instant;

/// State of the [`MeasureGuard`].
#[derive(Clone, Copy, Debug)]
enum MeasureState {
    /// The future is not ready.
    Pending,
    /// The future has terminated with a status.
    Done(&'static str),
}

/// A guard to [`measure`] the amount of time a future takes.
///
/// The timer is emitted when the guard is dropped. A guard that is dropped without being marked
/// [`done`](Self::done) reports its future as `canceled`.
pub struct MeasureGuard {
    state: MeasureState,
    task_name: &'static str,
    resource: &'static str,
    creation_time: Instant,
}

impl MeasureGuard {
    pub fn new(task_name: &'static str, resource: &'static str) -> Self {
        Self {
            state: MeasureState::Pending,
            task_name,
            resource,
            creation_time: Instant::now(),
        }
    }

    /// Marks the future as terminated.
    pub fn done<T, E>(mut self, reason: &Result<T, E>) {
        self.state = MeasureState::Done(m::result(reason));
    }
}

impl Drop for MeasureGuard {
    fn drop(&mut self) {
        let status = match self.state {
            MeasureState::Pending => "canceled",
            MeasureState::Done(status) => status,
        };

        metric!(
            timer(self.task_name) = self.creation_time.elapsed(),
            "status" => status,
            "resource" => self.resource,
        );
    }
}

/// Measures the timing of a future and reports it as a timer metric named `task_name`.
///
/// The metric is tagged with the resource and with the status of the future, which is also
/// reported when the future is dropped before completion.
pub fn measure<F, T, E>(
    task_name: &'static str,
    resource: &'static str,
    f: F,
) -> impl Future<Output = F::Output>
where
    F: Future<Output = Result<T, E>>,
{
    let guard = MeasureGuard::new(task_name, resource);
    async move {
        let output = f.await;
        guard.done(&output);
        output
    }
}

/// Helpers for the status tag of measured futures.
pub mod m {
    /// `"ok"` or `"err"`.
    pub fn result<T, E>(result: &Result<T, E>) -> &'static str {
        match result {
            Ok(_) => "ok",
            Err(_) => "err",
        }
    }
}
