//! Primary / secondary / manual fallback for individual control items.
//!
//! Needing manual intervention is a normal outcome: it is reported through
//! [`FallbackResult::requires_manual`], never as an error.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FallbackMethod {
    Primary,
    Secondary,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub method: FallbackMethod,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub control_id: String,
    pub attempts: Vec<FallbackAttempt>,
    pub success: bool,
    pub final_method: FallbackMethod,
    pub requires_manual: bool,
}

/// A remediation attempt. `Ok(false)` is an explicit "did not work".
pub type FallbackAction =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>> + Send>;

/// Box an async closure as a [`FallbackAction`].
pub fn fallback_action<F, Fut>(f: F) -> FallbackAction
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

async fn attempt(method: FallbackMethod, action: FallbackAction) -> FallbackAttempt {
    match action().await {
        Ok(true) => FallbackAttempt {
            method,
            success: true,
            error: None,
        },
        Ok(false) => FallbackAttempt {
            method,
            success: false,
            error: Some(format!("{method} method reported failure")),
        },
        Err(error) => FallbackAttempt {
            method,
            success: false,
            error: Some(format!("{error:#}")),
        },
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackHandler;

impl FallbackHandler {
    pub const fn new() -> Self {
        Self
    }

    pub async fn apply_with_fallback(
        &self,
        control_id: &str,
        primary: FallbackAction,
        secondary: Option<FallbackAction>,
    ) -> FallbackResult {
        let mut attempts = Vec::with_capacity(3);

        let first = attempt(FallbackMethod::Primary, primary).await;
        let primary_ok = first.success;
        attempts.push(first);
        if primary_ok {
            return finished(control_id, attempts, FallbackMethod::Primary);
        }

        if let Some(secondary) = secondary {
            tracing::info!(control_id, "primary remediation failed, trying secondary");
            let second = attempt(FallbackMethod::Secondary, secondary).await;
            let secondary_ok = second.success;
            attempts.push(second);
            if secondary_ok {
                return finished(control_id, attempts, FallbackMethod::Secondary);
            }
        }

        tracing::warn!(control_id, "automated remediation exhausted; manual action required");
        attempts.push(FallbackAttempt {
            method: FallbackMethod::Manual,
            success: false,
            error: Some("automated remediation failed; manual remediation required".into()),
        });
        FallbackResult {
            control_id: control_id.to_string(),
            attempts,
            success: false,
            final_method: FallbackMethod::Manual,
            requires_manual: true,
        }
    }
}

fn finished(
    control_id: &str,
    attempts: Vec<FallbackAttempt>,
    method: FallbackMethod,
) -> FallbackResult {
    FallbackResult {
        control_id: control_id.to_string(),
        attempts,
        success: true,
        final_method: method,
        requires_manual: false,
    }
}

/// Sharing and lock violations reported by the Windows file APIs.
#[cfg(windows)]
fn is_sharing_violation(error: &std::io::Error) -> bool {
    matches!(error.raw_os_error(), Some(32 | 33))
}

#[cfg(not(windows))]
fn is_sharing_violation(_error: &std::io::Error) -> bool {
    false
}

/// Timeouts and transient lock conditions are retryable; everything else,
/// including errors this function does not recognise, is permanent.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::Interrupted
                    | ErrorKind::ResourceBusy
                    | ErrorKind::ExecutableFileBusy
            ) || is_sharing_violation(io);
        }
    }
    false
}
