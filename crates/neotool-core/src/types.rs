//! Backend domain payloads.
//!
//! Field names follow the backend's camelCase JSON. Optional fields default
//! so older backends that omit them still decode.

use serde::{Deserialize, Serialize};

/// Numeric user id of a viewer or liver. Valid ids are positive.
pub type UserId = i64;

/// Whether `uid` can name a real user.
pub const fn is_valid_user_id(uid: UserId) -> bool {
    uid > 0
}

/// Account credentials for a fresh login. Empty credentials request an
/// anonymous visitor login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    /// Account name
    pub account: String,
    /// Account password
    pub password: String,
}

impl LoginData {
    /// Credentials for `account`.
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self { account: account.into(), password: password.into() }
    }

    /// Whether this requests an anonymous login.
    pub fn is_anonymous(&self) -> bool {
        self.account.is_empty()
    }
}

/// Authentication token returned by a login and presented on reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    /// User the token was issued to
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Per-session signing key
    #[serde(default)]
    pub security_key: String,
    /// Service token
    #[serde(default)]
    pub service_token: String,
    /// Device identifier bound to the token
    #[serde(rename = "deviceID", default)]
    pub device_id: String,
    /// Cookies for authenticated accounts
    #[serde(default)]
    pub cookies: Vec<String>,
}

/// Profile of a user as reported by `getUserInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// User id
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Display name
    #[serde(default)]
    pub nickname: String,
    /// Avatar URL
    #[serde(default)]
    pub avatar: String,
    /// Id of the current live broadcast, empty when offline
    #[serde(rename = "liveID", default)]
    pub live_id: String,
}

impl UserInfo {
    /// Whether the user is broadcasting right now.
    pub fn is_live(&self) -> bool {
        !self.live_id.is_empty()
    }
}

/// Description of an opened danmaku stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    /// Live broadcast the stream belongs to
    #[serde(rename = "liveID")]
    pub live_id: String,
    /// Broadcast title
    #[serde(default)]
    pub title: String,
    /// Broadcast start, milliseconds since the Unix epoch
    #[serde(default)]
    pub live_start_time: i64,
    /// Whether the broadcast is panoramic
    #[serde(default)]
    pub panoramic: bool,
    /// Backend stream name
    #[serde(default)]
    pub stream_name: String,
}

/// Sender of a danmaku item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DanmakuUser {
    /// Sender id
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Sender display name
    #[serde(default)]
    pub nickname: String,
}

/// Metadata shared by every pushed danmaku item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DanmuInfo {
    /// Send time, milliseconds since the Unix epoch
    #[serde(default)]
    pub send_time: i64,
    /// Who sent it
    pub user_info: DanmakuUser,
}

/// Viewer comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Sender metadata
    pub danmu_info: DanmuInfo,
    /// Comment text
    pub content: String,
}

/// Gift catalogue entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftDetail {
    /// Gift id
    #[serde(rename = "giftID")]
    pub gift_id: i64,
    /// Gift display name
    pub gift_name: String,
}

/// Gift sent to a liver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    /// Sender metadata
    pub danmu_info: DanmuInfo,
    /// Which gift
    pub gift_detail: GiftDetail,
    /// Gifts per combo step
    pub count: u32,
    /// Combo multiplier
    #[serde(default = "one")]
    pub combo: u32,
}

const fn one() -> u32 {
    1
}

impl Gift {
    /// Total number of gifts including the combo multiplier.
    pub fn total(&self) -> u64 {
        u64::from(self.count) * u64::from(self.combo)
    }
}

/// Danmaku item pushed for one liver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Danmaku<T> {
    /// Liver whose stream produced the item
    #[serde(rename = "liverUID")]
    pub liver_uid: UserId,
    /// Item payload
    pub data: T,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn user_info_decodes_backend_shape() {
        let info: UserInfo = serde_json::from_value(json!({
            "userID": 1000,
            "nickname": "liver",
            "avatar": "https://example.invalid/a.png",
            "liveID": "live1",
            "followingCount": 3,
        }))
        .unwrap();

        assert_eq!(info.user_id, 1000);
        assert!(info.is_live());
    }

    #[test]
    fn offline_user_has_no_live_id() {
        let info: UserInfo = serde_json::from_value(json!({"userID": 7})).unwrap();

        assert!(!info.is_live());
    }

    #[test]
    fn gift_total_applies_combo() {
        let gift: Gift = serde_json::from_value(json!({
            "danmuInfo": {"sendTime": 1, "userInfo": {"userID": 5, "nickname": "v"}},
            "giftDetail": {"giftID": 1, "giftName": "banana"},
            "count": 3,
            "combo": 4,
        }))
        .unwrap();

        assert_eq!(gift.total(), 12);
    }

    #[test]
    fn only_positive_ids_are_valid() {
        assert!(is_valid_user_id(1));
        assert!(!is_valid_user_id(0));
        assert!(!is_valid_user_id(-3));
    }
}
