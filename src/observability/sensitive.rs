use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Configuration value that must not end up in logs
///
/// Formatting and serialization print a placeholder; [`Sensitive::expose`]
/// hands out the real value.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct Sensitive<T>(T);

const REDACTED: &str = "[REDACTED]";

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> Debug for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> Display for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> Serialize for Sensitive<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

// Reading is transparent so config files can carry the real value.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Sensitive<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Sensitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn formatting_hides_the_value() {
        let path = Sensitive::new("/data/localnode1.db".to_string());
        assert_eq!(format!("{:?}", path), REDACTED);
        assert_eq!(path.to_string(), REDACTED);
        assert_eq!(path.expose(), "/data/localnode1.db");
    }

    #[test]
    fn config_maps_read_real_values_and_write_placeholders() {
        let parsed: BTreeMap<String, Sensitive<String>> =
            serde_json::from_str(r#"{"127.0.0.1:50001": "/data/a.db"}"#).unwrap();
        assert_eq!(parsed["127.0.0.1:50001"].expose(), "/data/a.db");

        let written = serde_json::to_string(&parsed).unwrap();
        assert_eq!(written, r#"{"127.0.0.1:50001":"[REDACTED]"}"#);
    }
}
