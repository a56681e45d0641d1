//! Login and refresh-token exchange payloads.
//!
//! # Example Response
//!
//! Both `login` and `refresh-token` answer with a token grant:
//!
//! ```json
//! {
//!     "success": true,
//!     "data": {
//!         "accessToken": "secret",
//!         "refreshToken": "secret",
//!         "member": { "memId": "u1", "memType": "USER" }
//!     }
//! }
//! ```
//!
//! Older backends call the identity `member`, newer ones `user`; both are
//! accepted.

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::session::{Session, UserProfile};

/// Login form.
#[derive(Clone, Eq, PartialEq, Serialize, Redact)]
pub struct Credentials {
    #[serde(rename = "memId")]
    pub mem_id: String,

    #[serde(rename = "memPw")]
    #[redact]
    pub mem_pw: String,
}

impl Credentials {
    pub fn new(mem_id: impl Into<String>, mem_pw: impl Into<String>) -> Self {
        Self {
            mem_id: mem_id.into(),
            mem_pw: mem_pw.into(),
        }
    }
}

/// Body of the refresh-token exchange.
#[derive(Clone, Eq, PartialEq, Serialize, Redact)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken")]
    #[redact]
    pub refresh_token: String,
}

/// Credentials and identity issued by login or refresh.
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct TokenGrant {
    #[serde(rename = "accessToken")]
    #[redact]
    pub access_token: String,

    #[serde(rename = "refreshToken")]
    #[redact]
    pub refresh_token: String,

    #[serde(alias = "member")]
    pub user: UserProfile,
}

impl From<TokenGrant> for Session {
    fn from(grant: TokenGrant) -> Self {
        Session::new(grant.access_token, grant.refresh_token, grant.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{json, Envelope};

    #[test]
    fn grant_accepts_member_alias() {
        let envelope: Envelope<TokenGrant> = json(
            br#"{"success":true,"data":{"accessToken":"A1","refreshToken":"R1","member":{"memId":"u1"}}}"#,
            "login",
        )
        .unwrap();
        let session = Session::from(envelope.data.unwrap());
        assert_eq!(session, Session::new("A1", "R1", UserProfile::new("u1")));
    }

    #[test]
    fn credentials_serialize_with_backend_names() {
        let body = serde_json::to_value(Credentials::new("u1", "p1")).unwrap();
        assert_eq!(body, serde_json::json!({"memId": "u1", "memPw": "p1"}));
        assert!(!format!("{:?}", Credentials::new("u1", "p1")).contains("p1"));
    }
}
