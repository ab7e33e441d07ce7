//! What the chat surface should show

use serde::Serialize;

/// Selectable option; `data` is the token string sent back when chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub label: String,
    pub data: String,
}

impl Action {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Message for a user other than the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub user_id: i64,
    pub text: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    pub actions: Vec<Action>,
    /// Token string of the previous stage
    pub back: Option<String>,
    /// Whether to offer a way back to the main menu
    pub home: bool,
    pub notifications: Vec<Notification>,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
            back: None,
            home: true,
            notifications: Vec::new(),
        }
    }

    pub fn action(mut self, label: impl Into<String>, data: impl Into<String>) -> Self {
        self.actions.push(Action::new(label, data));
        self
    }

    pub fn back(mut self, data: Option<String>) -> Self {
        self.back = data;
        self
    }

    pub fn without_home(mut self) -> Self {
        self.home = false;
        self
    }

    pub fn notify(mut self, user_id: i64, text: impl Into<String>, actions: Vec<Action>) -> Self {
        self.notifications.push(Notification {
            user_id,
            text: text.into(),
            actions,
        });
        self
    }
}
