use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single measurement emitted by a producer.
///
/// Records travel through the ingestion channel as their JSON encoding, the
/// transform stage is responsible for validating the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub measure_name: String,
    pub measure_value: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Record {
    pub fn new(measure_name: impl Into<String>, measure_value: f64) -> Self {
        Self {
            measure_name: measure_name.into(),
            measure_value,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the JSON encoding of the record.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let record = Record::new("measure_0", 42.5)
            .with_metadata("customer_id", "1")
            .with_metadata("zip_code", "59103");

        let json: serde_json::Value =
            serde_json::from_slice(&record.to_json().unwrap()).unwrap();

        assert_eq!(json["measure_name"], "measure_0");
        assert_eq!(json["measure_value"], 42.5);
        assert_eq!(json["metadata"]["customer_id"], "1");
        assert_eq!(json["metadata"]["zip_code"], "59103");
    }
}
