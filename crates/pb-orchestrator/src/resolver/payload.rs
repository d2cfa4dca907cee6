//! Remote configuration payload parsing
//!
//! Known response shapes are parsed through a typed schema first. When that
//! fails or yields no usable identity, a generic flattener searches the
//! whole document with ordered candidate-key lists.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use pb_core::types::QueueCredentials;

const SESSION_KEYS: &[&str] = &[
    "sessionkey",
    "sessionname",
    "session",
    "whatsappsession",
    "instancename",
    "instance",
];
const TOKEN_KEYS: &[&str] = &["token", "secretkey", "servicetoken", "apitoken", "authtoken"];
const ENV_KEYS: &[&str] = &["env", "envcontent", "envfile", "dotenv", "environment"];
const MODE_KEYS: &[&str] = &["integrationmode", "mode", "integration", "tipointegracao"];
const RUN_LOCALLY_KEYS: &[&str] = &["runlocally", "local", "rodarlocal", "executarlocal", "islocal"];
const QUEUE_URL_KEYS: &[&str] = &["queueurl", "filaurl", "amqpurl"];
const QUEUE_USER_KEYS: &[&str] = &["queueuser", "filausuario", "queueusername"];
const QUEUE_PASSWORD_KEYS: &[&str] = &["queuepassword", "filasenha"];

/// Fields extracted from a remote configuration response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePayload {
    pub session_key: Option<String>,
    pub service_token: Option<String>,
    pub env_content: Option<String>,
    pub integration_mode: Option<String>,
    pub run_locally: Option<bool>,
    pub queue: QueueCredentials,
}

impl RemotePayload {
    /// Parse a response body; `None` when it is not JSON
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;

        if let Some(typed) = parse_typed(&value) {
            return Some(typed);
        }

        tracing::debug!("Remote payload did not match a known shape, flattening");
        Some(Self::from_flattened(&flatten(&value)))
    }

    /// Whether both mandatory fields are present
    pub fn is_usable(&self) -> bool {
        self.session_key.is_some() && self.service_token.is_some()
    }

    fn from_flattened(map: &HashMap<String, String>) -> Self {
        let pick = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).cloned());
        Self {
            session_key: pick(SESSION_KEYS),
            service_token: pick(TOKEN_KEYS),
            env_content: pick(ENV_KEYS),
            integration_mode: pick(MODE_KEYS),
            run_locally: pick(RUN_LOCALLY_KEYS).and_then(|v| parse_bool_like(&v)),
            queue: QueueCredentials {
                url: pick(QUEUE_URL_KEYS),
                username: pick(QUEUE_USER_KEYS),
                password: pick(QUEUE_PASSWORD_KEYS),
            },
        }
    }
}

/// Documented response shape
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedConfig {
    #[serde(alias = "session_key", alias = "sessionName", alias = "session_name")]
    session_key: Option<String>,
    #[serde(alias = "token", alias = "secretKey", alias = "secret_key")]
    service_token: Option<String>,
    #[serde(alias = "env", alias = "env_content")]
    env_content: Option<String>,
    #[serde(alias = "integration_mode", alias = "mode")]
    integration_mode: Option<String>,
    #[serde(alias = "run_locally")]
    run_locally: Option<BoolLike>,
    #[serde(alias = "queue_url")]
    queue_url: Option<String>,
    #[serde(alias = "queue_user")]
    queue_user: Option<String>,
    #[serde(alias = "queue_password")]
    queue_password: Option<String>,
}

/// A single config object or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(TypedConfig),
    Many(Vec<TypedConfig>),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: OneOrMany,
}

/// Booleans as the backend sends them: real bools, 0/1, or words
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl BoolLike {
    fn value(&self) -> Option<bool> {
        match self {
            BoolLike::Bool(b) => Some(*b),
            BoolLike::Number(n) => Some(*n != 0),
            BoolLike::Text(s) => parse_bool_like(s),
        }
    }
}

impl From<TypedConfig> for RemotePayload {
    fn from(typed: TypedConfig) -> Self {
        Self {
            session_key: non_blank(typed.session_key),
            service_token: non_blank(typed.service_token),
            env_content: non_blank(typed.env_content),
            integration_mode: non_blank(typed.integration_mode),
            run_locally: typed.run_locally.and_then(|b| b.value()),
            queue: QueueCredentials {
                url: non_blank(typed.queue_url),
                username: non_blank(typed.queue_user),
                password: non_blank(typed.queue_password),
            },
        }
    }
}

/// Try the documented shapes; only a usable result counts
fn parse_typed(value: &Value) -> Option<RemotePayload> {
    let candidates = match serde_json::from_value::<Envelope>(value.clone()) {
        Ok(Envelope {
            data: OneOrMany::One(one),
        }) => vec![one],
        Ok(Envelope {
            data: OneOrMany::Many(many),
        }) => many,
        Err(_) => vec![serde_json::from_value::<TypedConfig>(value.clone()).ok()?],
    };

    candidates
        .into_iter()
        .map(RemotePayload::from)
        .find(RemotePayload::is_usable)
}

/// Lowercase and keep only ASCII letters and digits
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Flatten a JSON document into normalized key -> scalar text
///
/// Scalars of an object are visited before its nested values, arrays are
/// flattened element by element, and the first value seen for a key wins.
/// Blank strings and nulls are skipped.
pub fn flatten(value: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    flatten_into(value, &mut out);
    out
}

fn flatten_into(value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if let Some(text) = scalar_text(v) {
                    out.entry(normalize_key(key)).or_insert(text);
                }
            }
            for v in map.values() {
                if v.is_object() || v.is_array() {
                    flatten_into(v, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        _ => {}
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(Some(s.clone())),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Interpret yes/no style text
pub fn parse_bool_like(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "sim" | "s" | "on" | "verdadeiro" => Some(true),
        "false" | "0" | "no" | "n" | "nao" | "não" | "off" | "falso" => Some(false),
        _ => None,
    }
}
