use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry schedule: exponential backoff from 1s, plus jitter.
const RETRY_BASE_DELAY_SECS: u64 = 1;
const RETRY_JITTER_DIVISOR: u128 = 4; // + up to 25% jitter

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Request bodies are small JSON documents rebuilt on every attempt, so a
/// failure while sending one is as transient as a connect error.
fn is_retriable_send_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body()
}

fn retry_base_delay(attempt: usize) -> Duration {
    let multiplier = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
    Duration::from_secs(RETRY_BASE_DELAY_SECS.saturating_mul(multiplier))
}

fn add_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = delay.as_millis() / RETRY_JITTER_DIVISOR;
    if max_jitter_ms == 0 {
        return delay;
    }

    let max_jitter_ms = std::cmp::min(max_jitter_ms, u128::from(u64::MAX)) as u64;
    let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter_ms)
}

/// Send a request, retrying transient failures up to `max_retries` times.
///
/// Non-retriable responses are returned as-is so the caller can inspect the
/// status. With `max_retries == 0` this is a single plain send.
pub(super) async fn send_with_retry(
    mut make_request: impl FnMut() -> reqwest::RequestBuilder,
    max_retries: usize,
) -> Result<reqwest::Response, reqwest::Error> {
    let max_attempts = max_retries + 1;
    let mut attempt = 0;

    loop {
        match make_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || !is_retriable_status(status) || attempt >= max_retries
                {
                    return Ok(response);
                }

                let base_delay = retry_base_delay(attempt);
                let delay = add_jitter(base_delay);
                debug!(
                    "Backend answered {}; attempt {}/{} failed, next in {:?} (base {:?})",
                    status,
                    attempt + 1,
                    max_attempts,
                    delay,
                    base_delay
                );
                let _ = response.bytes().await;
                sleep(delay).await;
            }
            Err(err) => {
                if !is_retriable_send_error(&err) || attempt >= max_retries {
                    return Err(err);
                }

                let base_delay = retry_base_delay(attempt);
                let delay = add_jitter(base_delay);
                debug!(
                    "Backend unreachable ({}); attempt {}/{} failed, next in {:?} (base {:?})",
                    err,
                    attempt + 1,
                    max_attempts,
                    delay,
                    base_delay
                );
                sleep(delay).await;
            }
        }
        attempt += 1;
    }
}
