use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Standard `{success, data, message}` envelope used by the HTTP surface and
/// by the Vibe API.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Unwrap the envelope, turning `success=false` into an error message.
    pub fn into_result(self) -> Result<T, String> {
        if self.success {
            self.data.ok_or_else(|| "missing data in response".to_string())
        } else {
            Err(self
                .message
                .unwrap_or_else(|| "request failed".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_roundtrip() {
        let resp = ApiResponse::success(42);
        assert_eq!(resp.into_result(), Ok(42));
    }

    #[test]
    fn test_error_carries_message() {
        let resp: ApiResponse<i32> = ApiResponse::error("boom");
        assert_eq!(resp.into_result(), Err("boom".to_string()));
    }
}
