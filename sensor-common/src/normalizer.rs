use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::reading::{FieldConvention, NormalizedReading, ID, TIMESTAMP};
use crate::time::TimeSource;

/// Canonicalizes raw readings toward one [`FieldConvention`] and fills in
/// `id` and `timestamp` when the producer did not send them.
///
/// Values already present are never overwritten, so normalizing twice gives
/// the same result as normalizing once.
#[derive(Clone)]
pub struct Normalizer {
    convention: FieldConvention,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl Normalizer {
    pub fn new(convention: FieldConvention, timesource: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Normalizer {
            convention,
            timesource,
        }
    }

    pub fn convention(&self) -> FieldConvention {
        self.convention
    }

    pub fn normalize(&self, mut raw: Map<String, Value>) -> NormalizedReading {
        for (canonical, alternate) in self.convention.renamed_fields() {
            if let Some(value) = raw.remove(alternate) {
                // The canonical key wins when both are present
                if !raw.contains_key(canonical) {
                    raw.insert(canonical.to_string(), value);
                }
            }
        }

        if is_absent(raw.get(ID)) {
            raw.insert(ID.to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        if is_absent(raw.get(TIMESTAMP)) {
            raw.insert(
                TIMESTAMP.to_string(),
                Value::String(self.timesource.current_time()),
            );
        }

        NormalizedReading::new(raw, self.convention)
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}
