//! Capture post-processing: decode, extract, filter, enqueue.

use std::sync::Arc;

use serde::Serialize;

use places_harvest::{extract, CaptureLayout, FieldTable, HarvestResult, NormalizedRecord};

/// Receives records that passed extraction.
pub trait RecordSink: Send + Sync {
    fn accept(&self, record: NormalizedRecord);
}

/// Outcome of processing one captured response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub candidates: usize,
    pub enqueued: usize,
    /// Candidates dropped for lacking a name.
    pub discarded: usize,
}

/// Joins payload decoding, field extraction and the delivery queue.
pub struct CapturePipeline {
    layout: CaptureLayout,
    table: FieldTable,
    sink: Arc<dyn RecordSink>,
}

impl CapturePipeline {
    pub fn new(layout: CaptureLayout, table: FieldTable, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            layout,
            table,
            sink,
        }
    }

    pub fn layout(&self) -> &CaptureLayout {
        &self.layout
    }

    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    /// Process a response body. Records without a name never reach the sink.
    pub fn process(&self, body: &str) -> HarvestResult<CaptureSummary> {
        let candidates = self.layout.candidates(body)?;
        let mut summary = CaptureSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for raw in &candidates {
            let record = extract(raw, &self.table);
            if record.is_deliverable() {
                self.sink.accept(record);
                summary.enqueued += 1;
            } else {
                summary.discarded += 1;
            }
        }

        if summary.candidates > 0 {
            tracing::info!(
                "Captured {} places ({} without a name discarded)",
                summary.enqueued,
                summary.discarded
            );
        }
        Ok(summary)
    }

    /// Process an observed exchange, logging and swallowing decode failures.
    pub fn observe(&self, url: &str, body: &str) -> Option<CaptureSummary> {
        match self.process(body) {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!("Failed to decode capture from {url}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Sink that keeps everything it receives.
    #[derive(Default)]
    pub(crate) struct VecSink {
        pub records: Mutex<Vec<NormalizedRecord>>,
    }

    impl VecSink {
        pub fn names(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.name().unwrap_or_default().to_string())
                .collect()
        }
    }

    impl RecordSink for VecSink {
        fn accept(&self, record: NormalizedRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    /// A search response body holding places with the given names.
    pub(crate) fn search_body(names: &[Value]) -> String {
        let places: Vec<Value> = names
            .iter()
            .map(|name| {
                let mut place = vec![Value::Null; 12];
                place[11] = name.clone();
                let mut item = vec![Value::Null; 15];
                item[1] = Value::Array(place);
                Value::Array(item)
            })
            .collect();
        let payload = json!([["query", places]]);
        let envelope = json!({ "c": 0, "d": format!(")]}}'\n{payload}") });
        format!("{envelope}/*\"\"*/")
    }

    fn pipeline(sink: Arc<VecSink>) -> CapturePipeline {
        CapturePipeline::new(CaptureLayout::default(), FieldTable::google_maps(), sink)
    }

    #[test]
    fn test_process_enqueues_named_records_in_order() {
        let sink = Arc::new(VecSink::default());
        let summary = pipeline(sink.clone())
            .process(&search_body(&[json!("A"), json!("B"), json!("C")]))
            .unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.enqueued, 3);
        assert_eq!(sink.names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_falsy_names_never_enqueued() {
        let sink = Arc::new(VecSink::default());
        let summary = pipeline(sink.clone())
            .process(&search_body(&[
                json!(""),
                json!(null),
                json!(0),
                json!("Kept"),
                json!(false),
            ]))
            .unwrap();

        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.discarded, 4);
        assert_eq!(sink.names(), vec!["Kept"]);
    }

    #[test]
    fn test_observe_swallows_malformed_bodies() {
        let sink = Arc::new(VecSink::default());
        let p = pipeline(sink.clone());
        assert!(p.observe("/search?tbm=map", "not json at all").is_none());
        assert!(p.observe("/search?tbm=map", r#"{"d": 5}"#).is_none());
        assert!(sink.records.lock().unwrap().is_empty());
    }
}
