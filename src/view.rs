//! Screen-level state shared by the list screens.

use serde::Serialize;

use crate::error::ServiceError;

/// What a list screen shows: every failure becomes the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ListState<T> {
    Loading,
    Error(String),
    Empty,
    Ready(Vec<T>),
}

impl<T> ListState<T> {
    pub fn from_result<E: std::fmt::Display>(result: Result<Vec<T>, E>) -> Self {
        match result {
            Ok(items) if items.is_empty() => Self::Empty,
            Ok(items) => Self::Ready(items),
            Err(e) => Self::Error(e.to_string()),
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Self::Ready(items) => items,
            _ => &[],
        }
    }
}

impl<T> From<Result<Vec<T>, ServiceError>> for ListState<T> {
    fn from(result: Result<Vec<T>, ServiceError>) -> Self {
        match result {
            Err(e) => Self::Error(e.user_message()),
            Ok(items) => Self::from_result::<ServiceError>(Ok(items)),
        }
    }
}

/// Destructive actions need an explicit confirmation step first.
pub fn require_confirmation(confirmed: bool) -> Result<(), ServiceError> {
    if confirmed {
        Ok(())
    } else {
        Err(ServiceError::NotConfirmed)
    }
}
