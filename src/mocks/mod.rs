//! In-process [`Sender`] for tests.
//!
//! [`MockSender`] counts sends and can be configured to fail with a fixed
//! error or to run a validator against every message.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::errors::{EmailError, EmailResult, SharedError};
use crate::sender::Sender;
use crate::types::Message;

/// Callback run against every message passed to [`MockSender::send`].
pub type Validator = Arc<dyn Fn(&Message) -> EmailResult<()> + Send + Sync>;

/// Configuration change applied by [`MockSender::new`] and
/// [`MockSender::reset`].
pub struct MockOpt(Box<dyn FnOnce(&mut MockState) + Send>);

/// Runs `validator` on each sent message and returns its result.
pub fn with_validator<F>(validator: F) -> MockOpt
where
    F: Fn(&Message) -> EmailResult<()> + Send + Sync + 'static,
{
    let validator: Validator = Arc::new(validator);
    MockOpt(Box::new(move |s| s.validator = Some(validator)))
}

/// Makes every send fail with `error`.
pub fn with_error<E>(error: E) -> MockOpt
where
    E: std::error::Error + Send + Sync + 'static,
{
    let error: SharedError = Arc::new(error);
    MockOpt(Box::new(move |s| s.error = Some(error)))
}

/// Clears the validator.
pub fn without_validator() -> MockOpt {
    MockOpt(Box::new(|s| s.validator = None))
}

/// Clears the fixed error.
pub fn without_error() -> MockOpt {
    MockOpt(Box::new(|s| s.error = None))
}

/// State guarded by the [`MockSender`] mutex.
#[derive(Default)]
pub struct MockState {
    count: usize,
    validator: Option<Validator>,
    error: Option<SharedError>,
}

/// Mock transport.
#[derive(Default)]
pub struct MockSender {
    state: Mutex<MockState>,
}

impl MockSender {
    /// Creates a mock with `opts` applied in order.
    pub fn new(opts: impl IntoIterator<Item = MockOpt>) -> Self {
        let mut state = MockState::default();
        for opt in opts {
            (opt.0)(&mut state);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Number of send calls since creation or the last reset, failed ones
    /// included.
    pub fn message_count(&self) -> usize {
        self.lock().count
    }

    /// Replaces the fixed error; `None` clears it.
    pub fn set_error(&self, error: Option<SharedError>) {
        self.lock().error = error;
    }

    /// Zeroes the count and applies `opts`.
    ///
    /// Configuration not touched by `opts` is kept.
    pub fn reset(&self, opts: impl IntoIterator<Item = MockOpt>) {
        let mut state = self.lock();
        state.count = 0;
        for opt in opts {
            (opt.0)(&mut state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for MockSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockSender")
            .field("count", &state.count)
            .field("has_validator", &state.validator.is_some())
            .field("error", &state.error)
            .finish()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        let validator = {
            let mut state = self.lock();
            state.count += 1;
            if let Some(error) = &state.error {
                return Err(EmailError::Other(Arc::clone(error)));
            }
            state.validator.clone()
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(subject = %message.subject(), "mock sender accepted message");

        match validator {
            Some(validate) => validate(message),
            None => Ok(()),
        }
    }
}
