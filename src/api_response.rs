use serde::Serialize;

/// Typed success envelope, merging the teacher's `api_response.rs` free
/// functions with the sibling `restflow-server` crate's typed
/// `ApiResponse<T>` into one shape used across the API surface.
#[derive(Serialize, Debug)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> axum::Json<Self> {
        axum::Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> axum::Json<Self> {
        axum::Json(Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        })
    }
}
