use std::future::Future;

use anyhow::Result;

/// Runs `op` until it succeeds, at most `max_retries + 1` times. `on_retry`
/// sees the 1-based number of the attempt that just failed before the next
/// one starts. The last error is returned once attempts are exhausted.
pub async fn retry<T, F, Fut, R>(max_retries: u32, mut op: F, mut on_retry: R) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &anyhow::Error),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt <= max_retries => on_retry(attempt, &e),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let mut calls = 0;
        let result: Result<()> = retry(
            0,
            |_| {
                calls += 1;
                async { Err(anyhow!("boom")) }
            },
            |_, _| panic!("no retry expected"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn returns_last_error_after_exhaustion() {
        let mut retried = Vec::new();
        let result: Result<()> = retry(
            2,
            |attempt| async move { Err(anyhow!("attempt {attempt}")) },
            |attempt, _| retried.push(attempt),
        )
        .await;
        assert_eq!(result.unwrap_err().to_string(), "attempt 3");
        assert_eq!(retried, vec![1, 2]);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let result = retry(
            5,
            |attempt| async move {
                if attempt < 2 {
                    Err(anyhow!("flaky"))
                } else {
                    Ok(attempt)
                }
            },
            |_, _| {},
        )
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
