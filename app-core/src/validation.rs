use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

static LOGIN_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._@\-]{1,64}$").expect("login id regex"));

// Scanned payment tokens: URL-safe base64 or UUID-like strings.
static PAYMENT_TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-+/=.]{4,512}$").expect("payment token regex"));

// Expo/FCM/APNs device tokens.
static PUSH_TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(ExponentPushToken\[[A-Za-z0-9_\-]+\]|[A-Za-z0-9:_\-]{32,4096})$")
        .expect("push token regex")
});

const MAX_PASSWORD_LEN: usize = 128;
const MAX_INQUIRY_TITLE_LEN: usize = 100;
const MAX_INQUIRY_CONTENT_LEN: usize = 2000;

/// Input checks applied before anything is sent to the backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputValidator;

impl InputValidator {
    pub fn validate_login_id(&self, id: &str) -> AppResult<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::ValidationError("아이디를 입력해주세요".to_string()));
        }
        if !LOGIN_ID_PATTERN.is_match(id) {
            return Err(AppError::ValidationError(
                "아이디 형식이 올바르지 않습니다".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_password(&self, password: &str) -> AppResult<()> {
        if password.is_empty() {
            return Err(AppError::ValidationError("비밀번호를 입력해주세요".to_string()));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(AppError::ValidationError("Password too long".to_string()));
        }
        check_control_chars(password)
    }

    pub fn validate_payment_token(&self, token: &str) -> AppResult<()> {
        if !PAYMENT_TOKEN_PATTERN.is_match(token) {
            return Err(AppError::ValidationError(
                "유효하지 않은 결제 코드입니다".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_push_token(&self, token: &str) -> AppResult<()> {
        if !PUSH_TOKEN_PATTERN.is_match(token) {
            return Err(AppError::ValidationError(
                "Push token format is invalid".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_inquiry(&self, title: &str, content: &str) -> AppResult<()> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(AppError::ValidationError(
                "제목과 내용을 모두 입력해주세요".to_string(),
            ));
        }
        if title.chars().count() > MAX_INQUIRY_TITLE_LEN
            || content.chars().count() > MAX_INQUIRY_CONTENT_LEN
        {
            return Err(AppError::ValidationError("Inquiry too long".to_string()));
        }
        check_control_chars(title)
    }
}

fn check_control_chars(input: &str) -> AppResult<()> {
    if input.chars().any(|c| c.is_control()) {
        return Err(AppError::ValidationError(
            "Input contains control characters".to_string(),
        ));
    }
    Ok(())
}
