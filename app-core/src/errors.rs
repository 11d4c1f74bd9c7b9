use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes the UI reacts to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No response received (timeout or connectivity).
    Network,
    /// 401 that could not be recovered by refreshing; the user must log in again.
    Auth,
    /// Domain failure signaled through a response body `code`.
    Business,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    // Network errors
    NetworkError(String),
    Timeout,
    InvalidResponse(String),

    // Server rejections
    Unauthorized {
        body: Option<String>,
    },
    Api {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },

    // Storage errors
    StorageError(String),
    CryptoError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),

    // Generic errors
    Unknown(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NetworkError(_) | AppError::Timeout => ErrorKind::Network,
            AppError::Unauthorized { .. } => ErrorKind::Auth,
            AppError::Api { code: Some(_), .. } => ErrorKind::Business,
            _ => ErrorKind::Unknown,
        }
    }

    /// Body `code` of a rejected API call, if the server sent one.
    pub fn business_code(&self) -> Option<&str> {
        match self {
            AppError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Unauthorized { .. } => Some(401),
            AppError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message shown to the user when a login or form submission fails.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Timeout | AppError::NetworkError(_) => {
                "네트워크 연결을 확인해주세요".to_string()
            }
            AppError::Unauthorized { .. } => "아이디 또는 비밀번호가 올바르지 않습니다".to_string(),
            AppError::ValidationError(msg) => msg.clone(),
            AppError::Api {
                message: Some(message),
                ..
            } if !message.is_empty() => message.clone(),
            _ => "요청을 처리하지 못했습니다. 잠시 후 다시 시도해주세요".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AppError::Timeout => write!(f, "Request timed out"),
            AppError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),

            AppError::Unauthorized { body } => match body {
                Some(body) => write!(f, "Unauthorized: {}", body),
                None => write!(f, "Unauthorized"),
            },
            AppError::Api {
                status,
                code,
                message,
            } => {
                write!(f, "HTTP {}", status)?;
                if let Some(code) = code {
                    write!(f, " [{}]", code)?;
                }
                if let Some(message) = message {
                    write!(f, ": {}", message)?;
                }
                Ok(())
            }

            AppError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            AppError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            AppError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            AppError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            AppError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => AppError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => AppError::PermissionDenied(error.to_string()),
            _ => AppError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::Timeout
        } else if error.is_decode() {
            AppError::InvalidResponse(error.to_string())
        } else {
            AppError::NetworkError(error.to_string())
        }
    }
}
