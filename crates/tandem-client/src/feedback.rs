//! What the UI should show after an operation.
//!
//! Errors and partial outcomes are mapped onto a small set of [`Notice`]s so
//! every screen reacts the same way: validation problems block inline, an
//! empty balance opens the purchase prompt, I/O failures get a dismissible
//! toast, and a missed debit is reported without hiding the sent message.

use serde::Serialize;

use crate::error::{ClientError, SendError};
use crate::pipeline::SendOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Notice {
    /// Block the action and show the reason next to the input.
    InlineValidation { message: String },
    /// Offer the credit purchase flow.
    InsufficientBalance { balance: i64 },
    /// Dismissible notification; the user may retry.
    Transient { message: String, retryable: bool },
    /// The message went out but the balance could not be charged.
    BalanceWarning { message: String },
}

impl From<&SendError> for Notice {
    fn from(err: &SendError) -> Self {
        match err {
            SendError::Validation(e) => Notice::InlineValidation {
                message: e.to_string(),
            },
            SendError::InsufficientBalance { balance } => {
                Notice::InsufficientBalance { balance: *balance }
            }
            other => Notice::Transient {
                message: other.to_string(),
                retryable: other.is_transient(),
            },
        }
    }
}

impl From<&ClientError> for Notice {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::Validation(e) => Notice::InlineValidation {
                message: e.to_string(),
            },
            ClientError::Remote(e) => Notice::Transient {
                message: e.to_string(),
                retryable: e.is_transient(),
            },
            other => Notice::Transient {
                message: other.to_string(),
                retryable: false,
            },
        }
    }
}

impl SendOutcome {
    /// Soft notice to show next to a message that was sent.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            SendOutcome::DebitFailed { cause, .. } => Some(Notice::BalanceWarning {
                message: format!("Message sent, but your balance could not be updated: {cause}"),
            }),
            SendOutcome::Settled { .. } | SendOutcome::Duplicate { .. } => None,
        }
    }
}
