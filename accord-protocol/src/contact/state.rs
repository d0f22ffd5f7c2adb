use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Contact request state. Values are persisted and transmitted, so the
/// discriminants never change.
///
/// `Mutual` and `Received` never appear on the local track; `Mutual` is only
/// produced by [`super::Contact::contact_request_state`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u64)]
pub enum ContactRequestState {
    #[default]
    None = 0,
    Mutual = 1,
    Sent = 2,
    Received = 3,
    Dismissed = 4,
}

impl ContactRequestState {
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn from_u64(value: u64) -> Result<Self, ValidationError> {
        match value {
            0 => Ok(ContactRequestState::None),
            1 => Ok(ContactRequestState::Mutual),
            2 => Ok(ContactRequestState::Sent),
            3 => Ok(ContactRequestState::Received),
            4 => Ok(ContactRequestState::Dismissed),
            other => Err(ValidationError::UnknownState(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactRequestState::None => "none",
            ContactRequestState::Mutual => "mutual",
            ContactRequestState::Sent => "sent",
            ContactRequestState::Received => "received",
            ContactRequestState::Dismissed => "dismissed",
        }
    }
}
