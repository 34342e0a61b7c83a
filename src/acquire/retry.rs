//! Bounded retry for a single control interaction.

use tracing::debug;

/// Result of one attempt, or of the whole retry sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Success(T),
    /// Worth repeating.
    TransientFailure(String),
    /// Repeating will not help.
    DefinitiveFailure(String),
}

/// Run `attempt` until it succeeds, fails definitively, or `max_attempts`
/// transient failures have happened, in which case the last one is
/// escalated to `DefinitiveFailure`. `Err` from the closure is fatal and
/// returned immediately without further attempts.
///
/// The closure receives the 1-based attempt number. A `max_attempts` of 0
/// is treated as 1.
pub fn with_retries<T, E, F>(max_attempts: u32, mut attempt: F) -> Result<Attempt<T>, E>
where
    F: FnMut(u32) -> Result<Attempt<T>, E>,
{
    let max_attempts = max_attempts.max(1);

    for n in 1..=max_attempts {
        match attempt(n)? {
            Attempt::TransientFailure(reason) if n < max_attempts => {
                debug!(attempt = n, max_attempts, %reason, "transient failure, retrying");
            }
            Attempt::TransientFailure(reason) => {
                return Ok(Attempt::DefinitiveFailure(format!(
                    "gave up after {max_attempts} attempts: {reason}"
                )));
            }
            done => return Ok(done),
        }
    }

    // the last iteration always returns
    Ok(Attempt::DefinitiveFailure("no attempts made".to_string()))
}
