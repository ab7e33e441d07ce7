//! API request and response types

use crate::board::StatusBoard;
use crate::protocol::Sender;
use serde::{Deserialize, Serialize};

/// First contact from a user
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user: Sender,
}

/// A chosen action: `data` is the token string of the chosen option
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub user: Sender,
    pub data: String,
}

/// Status board plus its rendering for group chats
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub text: String,
    pub board: StatusBoard,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
