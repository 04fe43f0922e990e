use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::Value;

const SEGMENT_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Request parameters sent as an `application/x-www-form-urlencoded` body.
pub type Params = BTreeMap<String, Value>;

/// Flatten parameters into form pairs the API understands.
///
/// Booleans become `1`/`0`, strings pass through unquoted and `null`
/// entries are dropped.
pub fn form_pairs(params: &Params) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// Escape a caller-supplied value for use as one URL path segment.
pub fn path_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT_SET).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn booleans_become_digits() {
        let params = Params::from([
            ("full".to_string(), json!(true)),
            ("onboot".to_string(), json!(false)),
        ]);
        assert_eq!(
            form_pairs(&params),
            vec![
                ("full".to_string(), "1".to_string()),
                ("onboot".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn strings_and_numbers_are_plain_text() {
        let params = Params::from([
            ("name".to_string(), json!("web-01")),
            ("newid".to_string(), json!(142)),
            ("description".to_string(), Value::Null),
        ]);
        assert_eq!(
            form_pairs(&params),
            vec![
                ("name".to_string(), "web-01".to_string()),
                ("newid".to_string(), "142".to_string()),
            ]
        );
    }

    #[test]
    fn path_segments_cannot_escape() {
        assert_eq!(path_segment("before-upgrade"), "before-upgrade");
        assert_eq!(path_segment("a/../b?x#y"), "a%2F..%2Fb%3Fx%23y");
        assert_eq!(path_segment("50%"), "50%25");
        assert_eq!(
            path_segment("UPID:node7:00001234::qmstart:101:root@pam:"),
            "UPID:node7:00001234::qmstart:101:root@pam:"
        );
    }
}
