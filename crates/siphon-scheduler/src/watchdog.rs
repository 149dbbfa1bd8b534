use siphon_core::{panic_payload_to_str, CancellationToken, ExtractError};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Runs `f` on its own thread and waits for it, up to `timeout` when one is set.
///
/// At the deadline `attempt_token` is cancelled and `DeadlineExceeded` is
/// returned immediately; the thread cannot be killed, so the abandoned body is
/// expected to notice the token at its next chunk boundary. If `task_token` is
/// cancelled while waiting, `Cancelled` is returned the same way. Panics in
/// `f` become [`ExtractError::Panicked`].
pub(crate) fn run_isolated<T, F>(
    name: String,
    timeout: Option<Duration>,
    task_token: &CancellationToken,
    attempt_token: CancellationToken,
    f: F,
) -> Result<T, ExtractError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractError> + Send + 'static,
{
    if task_token.is_cancelled() {
        return Err(ExtractError::Cancelled);
    }

    let (tx, rx) = mpsc::channel::<Result<T, ExtractError>>();
    std::thread::Builder::new().name(name).spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or_else(
            |payload| Err(ExtractError::Panicked(panic_payload_to_str(&*payload).to_owned())),
        );
        let _ = tx.send(result);
    })?;

    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if task_token.is_cancelled() {
            attempt_token.cancel();
            return Err(ExtractError::Cancelled);
        }

        let wait = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    attempt_token.cancel();
                    return Err(ExtractError::DeadlineExceeded(timeout.unwrap_or_default()));
                }
                remaining.min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        match rx.recv_timeout(wait) {
            Ok(result) => return result,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(ExtractError::Panicked(
                    "isolated attempt exited without a result".to_owned(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_cancels_the_attempt_token() {
        let task = CancellationToken::new();
        let attempt = task.child_token();
        let observed = attempt.clone();
        let start = Instant::now();

        let result = run_isolated(
            "test-isolated".into(),
            Some(Duration::from_millis(50)),
            &task,
            attempt.clone(),
            move || {
                while !observed.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(42_u32)
            },
        );

        assert!(matches!(result, Err(ExtractError::DeadlineExceeded(_))));
        assert!(attempt.is_cancelled());
        assert!(!task.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn panics_are_contained() {
        let task = CancellationToken::new();
        let result: Result<(), _> = run_isolated(
            "test-isolated".into(),
            None,
            &task,
            task.child_token(),
            || panic!("decoder blew up"),
        );
        assert_eq!(
            result,
            Err(ExtractError::Panicked("decoder blew up".to_owned()))
        );
    }

    #[test]
    fn results_pass_through() {
        let task = CancellationToken::new();
        let ok = run_isolated("t".into(), Some(Duration::from_secs(5)), &task, task.child_token(), || {
            Ok::<_, ExtractError>(7)
        });
        assert_eq!(ok, Ok(7));

        task.cancel();
        let cancelled = run_isolated("t".into(), None, &task, task.child_token(), || Ok(1));
        assert_eq!(cancelled, Err(ExtractError::Cancelled));
    }
}
