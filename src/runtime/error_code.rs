//! SCORM runtime error register values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    NoError = 0,
    GeneralException = 101,
    InvalidArgument = 201,
    ElementCannotHaveChildren = 202,
    ElementNotAnArray = 203,
    NotInitialized = 301,
    NotImplemented = 401,
    InvalidSetOnKeyword = 402,
    ReadOnly = 403,
    WriteOnly = 404,
    IncorrectDataType = 405,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 11] = [
        Self::NoError,
        Self::GeneralException,
        Self::InvalidArgument,
        Self::ElementCannotHaveChildren,
        Self::ElementNotAnArray,
        Self::NotInitialized,
        Self::NotImplemented,
        Self::InvalidSetOnKeyword,
        Self::ReadOnly,
        Self::WriteOnly,
        Self::IncorrectDataType,
    ];

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }

    /// Parse the string form content passes to `GetErrorString`.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().and_then(Self::from_code)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NoError => "No error",
            Self::GeneralException => "General exception",
            Self::InvalidArgument => "Invalid argument error",
            Self::ElementCannotHaveChildren => "Element cannot have children",
            Self::ElementNotAnArray => "Element not an array - cannot have count",
            Self::NotInitialized => "Not initialized",
            Self::NotImplemented => "Not implemented error",
            Self::InvalidSetOnKeyword => "Invalid set value, element is a keyword",
            Self::ReadOnly => "Element is read only",
            Self::WriteOnly => "Element is write only",
            Self::IncorrectDataType => "Incorrect data type",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_standard() {
        assert_eq!(ErrorCode::NoError.code(), 0);
        assert_eq!(ErrorCode::ReadOnly.code(), 403);
        assert_eq!(ErrorCode::NotInitialized.to_string(), "301");
        assert_eq!(ErrorCode::parse(" 405 "), Some(ErrorCode::IncorrectDataType));
        assert_eq!(ErrorCode::parse("999"), None);
        assert_eq!(ErrorCode::parse("abc"), None);
    }

    #[test]
    fn test_every_code_has_text() {
        for code in ErrorCode::ALL {
            assert!(!code.message().is_empty());
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
    }
}
