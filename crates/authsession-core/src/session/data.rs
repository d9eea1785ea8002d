use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload describing the authenticated subject, as sent by the backend.
///
/// Opaque apart from the optional `exp` expiry hint (seconds since epoch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserData(Map<String, Value>);

impl UserData {
    /// `None` unless `value` is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expiry hint in seconds since epoch. Fractional values are truncated.
    pub fn exp(&self) -> Option<i64> {
        match self.0.get("exp")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp().is_some_and(|exp| exp <= now)
    }

    /// True when the expiry hint has already elapsed. No hint, no expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

impl From<Map<String, Value>> for UserData {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A complete, valid session as produced by a login or refresh exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_data: UserData,
    pub refresh_token: String,
    /// Bearer token, when the backend returns it in the body rather than
    /// as a cookie. Never persisted.
    pub access_token: Option<String>,
}

/// Success body of `/login` and `/refresh`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionPayload {
    #[serde(default, alias = "user_data")]
    user_data: Option<Value>,
    /// Full claim set some backends send instead of `userData`.
    #[serde(default, alias = "token_data")]
    token_data: Option<Value>,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default, alias = "access_token")]
    access_token: Option<String>,
}

impl SessionPayload {
    /// A payload is well-formed only when both the user data (a non-empty
    /// object) and the refresh token (a non-empty string) are present.
    pub(crate) fn into_session(self) -> Option<Session> {
        let user_data = match self.user_data {
            Some(user_data) => user_data,
            None => user_data_from_claims(self.token_data?)?,
        };
        let user_data = UserData::from_value(user_data).filter(|d| !d.is_empty())?;
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty())?;
        let access_token = self.access_token.filter(|t| !t.is_empty());
        Some(Session {
            user_data,
            refresh_token,
            access_token,
        })
    }
}

/// The `user_data` claim, or `{username}` when the claims carry none. The
/// claim set's `exp` is kept as the expiry hint unless the user data has one.
fn user_data_from_claims(claims: Value) -> Option<Value> {
    let Value::Object(mut claims) = claims else {
        return None;
    };
    let mut user_data = match claims.remove("user_data") {
        Some(Value::Object(fields)) if !fields.is_empty() => fields,
        _ => {
            let username = claims.remove("username")?;
            let mut fields = Map::new();
            fields.insert("username".to_string(), username);
            fields
        }
    };
    if let Some(exp) = claims.remove("exp") {
        user_data.entry("exp").or_insert(exp);
    }
    Some(Value::Object(user_data))
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}
