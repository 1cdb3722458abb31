//! Request and response bodies of backend operations.

use neotool_core::{UserId, types::StreamInfo};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct SetClientIdRequest<'a> {
    #[serde(rename = "clientID")]
    pub client_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserInfoRequest {
    #[serde(rename = "userID")]
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub(crate) struct DanmakuRequest {
    #[serde(rename = "liverUID")]
    pub liver_uid: UserId,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ForwardRequest {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub message: String,
}

/// `streamInfo` is absent when the backend was already streaming this liver
/// to us.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetDanmakuResponse {
    #[serde(default)]
    pub stream_info: Option<StreamInfo>,
}
