//! Display helpers for emitting values as log fields.

use std::fmt::{
    self,
    Display,
    Formatter,
};

use serde::Serialize;

/// Wraps a serializable value so it is displayed as compact JSON.
pub fn json<T: Serialize>(val: &T) -> Json<'_, T> {
    Json(val)
}

pub struct Json<'a, T>(&'a T);

impl<T: Serialize> Display for Json<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self.0).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    #[derive(Serialize)]
    struct Example {
        name: &'static str,
        value: u64,
    }

    #[test]
    fn renders_compact_json() {
        let example = Example {
            name: "poll_interval_ms",
            value: 5000,
        };
        assert_eq!(
            super::json(&example).to_string(),
            r#"{"name":"poll_interval_ms","value":5000}"#,
        );
    }
}
