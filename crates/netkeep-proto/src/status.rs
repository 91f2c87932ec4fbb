use crate::FrameError;
use serde_json::Value;
use std::fmt;

/// Separates the fixed status fields from the free-form detail.
pub const DETAIL_SEPARATOR: &str = "======";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Login,
    Logout,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Login => "login",
            Operation::Logout => "logout",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound acknowledgement: `op:code:email:username[======detail]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub op: Operation,
    pub success: bool,
    pub email: String,
    pub username: String,
    pub detail: Option<String>,
}

impl StatusFrame {
    pub fn success(op: Operation, email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            op,
            success: true,
            email: email.into(),
            username: username.into(),
            detail: None,
        }
    }

    pub fn failure(
        op: Operation,
        email: impl Into<String>,
        username: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            op,
            success: false,
            email: email.into(),
            username: username.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn code(&self) -> u8 {
        u8::from(self.success)
    }

    /// Parses a rendered frame. The username may not contain `:`; the detail
    /// may contain anything.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (head, detail) = match text.split_once(DETAIL_SEPARATOR) {
            Some((head, detail)) => (head, Some(detail.to_string())),
            None => (text, None),
        };
        let mut parts = head.splitn(4, ':');
        let op = match parts.next() {
            Some("login") => Operation::Login,
            Some("logout") => Operation::Logout,
            other => {
                return Err(FrameError::InvalidStatus(format!(
                    "unknown operation {:?}",
                    other.unwrap_or_default()
                )))
            }
        };
        let success = match parts.next() {
            Some("1") => true,
            Some("0") => false,
            other => {
                return Err(FrameError::InvalidStatus(format!(
                    "invalid code {:?}",
                    other.unwrap_or_default()
                )))
            }
        };
        let email = parts
            .next()
            .ok_or_else(|| FrameError::InvalidStatus("missing email".to_string()))?;
        let username = parts
            .next()
            .ok_or_else(|| FrameError::InvalidStatus("missing username".to_string()))?;
        Ok(Self {
            op,
            success,
            email: email.to_string(),
            username: username.to_string(),
            detail,
        })
    }
}

impl fmt::Display for StatusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.op, self.code(), self.email, self.username)?;
        if let Some(detail) = &self.detail {
            write!(f, "{}{}", DETAIL_SEPARATOR, detail)?;
        }
        Ok(())
    }
}

/// Renders a JSON value the way the controller expects rejection payloads:
/// as a Python literal (`{'result': '0', 'msg': 'bad credentials'}`).
///
/// Object key order is preserved.
pub fn python_literal(value: &Value) -> String {
    let mut out = String::new();
    write_literal(value, &mut out);
    out
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_str_literal(s, out),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_literal(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_str_literal(key, out);
                out.push_str(": ");
                write_literal(item, out);
            }
            out.push('}');
        }
    }
}

fn write_str_literal(s: &str, out: &mut String) {
    // Single quotes unless the text has a ' and no ".
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_success_without_detail() {
        let frame = StatusFrame::success(Operation::Login, "a@b.com", "u1");
        assert_eq!(frame.to_string(), "login:1:a@b.com:u1");
    }

    #[test]
    fn renders_failure_with_detail() {
        let frame = StatusFrame::failure(Operation::Logout, "a@b.com", "u1", "timed out");
        assert_eq!(frame.to_string(), "logout:0:a@b.com:u1======timed out");
    }

    #[test]
    fn parse_reads_back_detail_with_separators() {
        let frame = StatusFrame::parse("login:0:a@b.com:u1======x:y======z").expect("parse");
        assert_eq!(frame.op, Operation::Login);
        assert!(!frame.success);
        assert_eq!(frame.username, "u1");
        assert_eq!(frame.detail.as_deref(), Some("x:y======z"));
    }

    #[test]
    fn parse_rejects_malformed_frames() {
        for text in ["", "reboot:1:a:b", "login:2:a:b", "login:1:a", "login"] {
            assert!(StatusFrame::parse(text).is_err(), "expected error for {text:?}");
        }
    }

    #[test]
    fn python_literal_matches_controller_format() {
        let payload = json!({"result": "0", "msg": "bad credentials"});
        assert_eq!(
            python_literal(&payload),
            "{'result': '0', 'msg': 'bad credentials'}"
        );
    }

    #[test]
    fn python_literal_scalars_and_nesting() {
        let payload = json!({"ret_code": 1, "ok": false, "v": null, "list": [true, 2.5, "x"], "o": {}});
        assert_eq!(
            python_literal(&payload),
            "{'ret_code': 1, 'ok': False, 'v': None, 'list': [True, 2.5, 'x'], 'o': {}}"
        );
    }

    #[test]
    fn python_literal_quotes_like_repr() {
        assert_eq!(python_literal(&json!("it's")), "\"it's\"");
        assert_eq!(python_literal(&json!("say \"hi\" it's")), "'say \"hi\" it\\'s'");
        assert_eq!(python_literal(&json!("a\\b\nc")), "'a\\\\b\\nc'");
        assert_eq!(python_literal(&json!("认证失败")), "'认证失败'");
    }
}
