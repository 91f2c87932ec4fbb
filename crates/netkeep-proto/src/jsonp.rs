use crate::FrameError;
use serde_json::Value;

/// Splits `identifier(body)` into its identifier and body.
///
/// The wrapper is the parenthesis pair that closes on the final `)`.
/// Parentheses inside JSON string literals are ignored and only whitespace
/// or a single `;` may follow the closing parenthesis. The identifier is
/// never inspected since the portal embeds a timestamp in it.
pub fn unwrap_callback(raw: &str) -> Result<(&str, &str), FrameError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if !trimmed.ends_with(')') {
        return Err(FrameError::MissingWrapper);
    }
    let close = trimmed.len() - 1;

    let mut depth = 0usize;
    let mut open = None;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in trimmed.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' => {
                if depth == 0 {
                    open = Some(idx);
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or(FrameError::MissingWrapper)?;
                if depth == 0 && idx == close {
                    let open = open.ok_or(FrameError::MissingWrapper)?;
                    return Ok((trimmed[..open].trim(), &trimmed[open + 1..close]));
                }
            }
            _ => {}
        }
    }

    Err(FrameError::MissingWrapper)
}

/// Decodes a callback-wrapped response into the JSON value it carries.
pub fn decode(raw: &str) -> Result<Value, FrameError> {
    let (_identifier, body) = unwrap_callback(raw)?;
    Ok(serde_json::from_str(body)?)
}
