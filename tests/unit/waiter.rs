//! Unit tests for the polling and retry primitives

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mysql_operator_e2e::wait::retry_fixed;
use mysql_operator_e2e::{Error, PollSchedule, wait_until};

mod wait_until_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_evaluates_once() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = wait_until("ready", PollSchedule::from_secs(30, 3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tokio::time::Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = wait_until("ready", PollSchedule::from_secs(30, 3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n >= 3) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_schedule_attempts() {
        let schedule = PollSchedule::from_secs(10, 3);
        let calls = AtomicU32::new(0);
        let err = wait_until("never", schedule, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), schedule.attempts());
        match err {
            Error::Timeout { what, after } => {
                assert_eq!(what, "never");
                assert_eq!(after, Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_evaluates() {
        let calls = AtomicU32::new(0);
        let err = wait_until("nothing", PollSchedule::from_secs(0, 3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_error_aborts_wait() {
        let calls = AtomicU32::new(0);
        let err = wait_until("broken", PollSchedule::from_secs(30, 3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 2 {
                    Err(Error::verification("store unreachable"))
                } else {
                    Ok(false)
                }
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Verification(ref m) if m == "store unreachable"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

mod retry_fixed_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let seen = Mutex::new(Vec::new());
        let result: Result<u32, String> =
            retry_fixed("open session", 5, Duration::from_secs(2), |attempt| {
                seen.lock().unwrap().push(attempt);
                async move {
                    if attempt < 3 {
                        Err(format!("refused on attempt {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let started = tokio::time::Instant::now();
        let result: Result<(), String> =
            retry_fixed("kill", 3, Duration::from_secs(2), |attempt| async move {
                Err(format!("failure {attempt}"))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        // No pause after the final attempt
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_fixed("once", 0, Duration::from_secs(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("no".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
