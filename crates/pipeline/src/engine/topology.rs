use std::fmt;
use std::sync::Arc;

use crate::broker::Record;
use crate::error::EngineError;

type ValueMapper = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A single-stage topology: read `source`, map each value, write `sink`.
///
/// Keys are carried through untouched and null values stay null.
#[derive(Clone)]
pub struct Topology {
    source: String,
    sink: String,
    mapper: ValueMapper,
}

impl Topology {
    pub fn map_values<F>(source: impl Into<String>, sink: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            sink: sink.into(),
            mapper: Arc::new(mapper),
        }
    }

    /// The uppercase stage used by the pipeline.
    pub fn uppercase(source: impl Into<String>, sink: impl Into<String>) -> Self {
        Self::map_values(source, sink, str::to_uppercase)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.source.is_empty() {
            return Err(EngineError::Topology("source topic is empty".to_string()));
        }
        if self.sink.is_empty() {
            return Err(EngineError::Topology("sink topic is empty".to_string()));
        }
        if self.source == self.sink {
            return Err(EngineError::Topology(format!(
                "source and sink are both {}",
                self.source
            )));
        }
        Ok(())
    }

    /// Transform a consumed record into the (key, value) to publish.
    pub fn apply(&self, record: &Record) -> (Option<String>, Option<String>) {
        let value = record.value.as_deref().map(|v| (self.mapper)(v));
        (record.key.clone(), value)
    }

    pub fn describe(&self) -> String {
        format!(
            "Topology: source({}) --> mapValues --> sink({})",
            self.source, self.sink
        )
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("source", &self.source)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: Option<&str>, value: Option<&str>) -> Record {
        Record {
            topic: "in".to_string(),
            partition: 0,
            offset: 0,
            key: key.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_uppercase_preserves_key() {
        let topology = Topology::uppercase("in", "out");
        let (key, value) = topology.apply(&record(Some("key3"), Some("value3")));
        assert_eq!(key.as_deref(), Some("key3"));
        assert_eq!(value.as_deref(), Some("VALUE3"));
    }

    #[test]
    fn test_null_value_passes_through() {
        let topology = Topology::uppercase("in", "out");
        let (key, value) = topology.apply(&record(None, None));
        assert!(key.is_none());
        assert!(value.is_none());
    }

    #[test]
    fn test_validation() {
        assert!(Topology::uppercase("in", "out").validate().is_ok());
        assert!(Topology::uppercase("", "out").validate().is_err());
        assert!(Topology::uppercase("same", "same").validate().is_err());
    }

    #[test]
    fn test_describe() {
        let text = Topology::uppercase("kstreams-topic3", "kstreams-topic4").describe();
        assert!(text.contains("source(kstreams-topic3)"));
        assert!(text.contains("sink(kstreams-topic4)"));
    }
}
