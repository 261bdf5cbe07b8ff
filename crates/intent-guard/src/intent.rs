use serde_json::Value;

/// The few intent fields the guard needs, read tolerantly from the raw body.
///
/// The full schema belongs to the downstream handler; anything missing or
/// malformed here just yields `None` / `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentFields {
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub dry_run: bool,
}

impl IntentFields {
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(Value::Object(obj)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        Self {
            symbol: obj.get("symbol").and_then(Value::as_str).map(str::to_string),
            side: obj.get("side").and_then(Value::as_str).map(str::to_string),
            // only a literal `true` opts out of caps
            dry_run: obj.get("dry_run").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("buy"))
    }
}
