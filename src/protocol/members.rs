//! Member enrolment, ID availability and profile update payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use veil::Redact;

/// Value of `data` in an ID check response when the ID is taken.
pub const DUPLICATE_ID: &str = "dup";

/// Enrolment form.
#[skip_serializing_none]
#[derive(Clone, Default, Eq, PartialEq, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct SignupForm {
    pub mem_id: String,
    #[redact]
    pub mem_pw: String,
    pub mem_name: String,
    /// Member type; the backend assigns `USER` when absent
    pub mem_type: Option<String>,
    pub mem_email: Option<String>,
    pub mem_address: Option<String>,
    pub mem_cellphone: Option<String>,
    pub mem_phone: Option<String>,
    /// Resident registration number
    #[redact]
    pub mem_rnn: Option<String>,
}

/// Result of a successful enrolment.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct Enrolled {
    #[serde(rename = "memUuid")]
    pub mem_uuid: Option<String>,
}

/// Changed profile fields, sent as-is and echoed back by the backend.
pub type ProfileChanges = Map<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_form_omits_absent_fields() {
        let form = SignupForm {
            mem_id: "u1".to_owned(),
            mem_pw: "p1".to_owned(),
            mem_name: "Kim".to_owned(),
            mem_email: Some("kim@example.com".to_owned()),
            ..SignupForm::default()
        };
        let body = serde_json::to_value(&form).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "memId": "u1",
                "memPw": "p1",
                "memName": "Kim",
                "memEmail": "kim@example.com",
            })
        );
    }
}
