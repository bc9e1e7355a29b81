use std::time::Duration;

use enginelink_transport::Value;

pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2}s");
    }
    let total = d.as_secs();
    format!("{}m{:02}s", total / 60, total % 60)
}

/// Plain rendering of a call result; `None` when there is nothing to print.
pub fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Empty => None,
        Value::Text(s) => Some(s.clone()),
        Value::Tuple(items) => Some(
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        other => Some(other.to_string()),
    }
}
