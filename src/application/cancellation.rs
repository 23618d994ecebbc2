//! Per-run cancellation capability

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the cancellation token of exactly one run.
///
/// The same token is handed to the scheduler loop and to every request the
/// run makes, so cancelling both stops dispatch and aborts the request that
/// is in flight.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request cancellation. Returns `true` only for the call that actually
    /// flipped the token; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        info!("🛑 Run cancellation requested");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let controller = CancellationController::new();
        let token = controller.token();
        assert!(!token.is_cancelled());

        assert!(controller.cancel());
        assert!(!controller.cancel());
        assert!(token.is_cancelled());
        assert!(controller.is_cancelled());
    }

    #[test]
    fn test_each_controller_is_fresh() {
        let first = CancellationController::new();
        first.cancel();
        let second = CancellationController::new();
        assert!(!second.is_cancelled());
    }
}
