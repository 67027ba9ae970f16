//! 面向用户的错误文案

use crate::core::{ErrorClass, NormalizedError};

pub const GENERIC_USER_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// 按分类查表；Unknown 时再按状态码查表，最后回退到 error.message 或通用文案。永不为空。
pub fn to_user_message(error: &NormalizedError) -> String {
    if let Some(msg) = by_classification(error.classification) {
        return msg.to_string();
    }
    if let Some(msg) = error.status_code.and_then(by_status) {
        return msg.to_string();
    }
    let fallback = error.message.trim();
    if fallback.is_empty() {
        GENERIC_USER_MESSAGE.to_string()
    } else {
        fallback.to_string()
    }
}

fn by_classification(class: ErrorClass) -> Option<&'static str> {
    let msg = match class {
        ErrorClass::Network => {
            "Unable to connect to the server. Please check your internet connection."
        }
        ErrorClass::InvalidInput => {
            "Invalid file format. Please upload a valid Excel file (.xls or .xlsx)."
        }
        ErrorClass::TooLarge => "The file is too large. Please upload a smaller file.",
        ErrorClass::Processing => {
            "An error occurred while processing your file. Please check the file and try again."
        }
        ErrorClass::RateLimited => "Too many requests. Please wait a moment and try again.",
        ErrorClass::NotFound => "The requested resource was not found.",
        ErrorClass::Forbidden => "You do not have permission to perform this action.",
        ErrorClass::Server => "A server error occurred. Please try again later.",
        ErrorClass::Unknown => return None,
    };
    Some(msg)
}

fn by_status(status: u16) -> Option<&'static str> {
    match status {
        404 => Some("The requested resource was not found."),
        403 => Some("You do not have permission to perform this action."),
        500 => Some("A server error occurred. Please try again later."),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_message() {
        let err = NormalizedError::new(ErrorClass::Network, "connection refused");
        assert_eq!(
            to_user_message(&err),
            "Unable to connect to the server. Please check your internet connection."
        );
    }

    #[test]
    fn test_unknown_falls_back_to_status() {
        let err = NormalizedError::new(ErrorClass::Unknown, "whatever").with_status(404);
        assert_eq!(to_user_message(&err), "The requested resource was not found.");

        let err = NormalizedError::new(ErrorClass::Unknown, "whatever").with_status(403);
        assert_eq!(
            to_user_message(&err),
            "You do not have permission to perform this action."
        );

        let err = NormalizedError::new(ErrorClass::Unknown, "whatever").with_status(500);
        assert_eq!(
            to_user_message(&err),
            "A server error occurred. Please try again later."
        );
    }

    #[test]
    fn test_unknown_uses_error_message() {
        let err = NormalizedError::new(ErrorClass::Unknown, "Month/year is required").with_status(400);
        assert_eq!(to_user_message(&err), "Month/year is required");
    }

    #[test]
    fn test_never_empty() {
        let err = NormalizedError::new(ErrorClass::Unknown, "  ");
        assert_eq!(to_user_message(&err), GENERIC_USER_MESSAGE);
    }

    #[test]
    fn test_classification_wins_over_message() {
        let err = NormalizedError::new(ErrorClass::TooLarge, "413 Payload Too Large").with_status(413);
        assert!(to_user_message(&err).contains("too large"));
    }
}
