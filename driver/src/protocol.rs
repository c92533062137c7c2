//! Wire shapes for the inbound grading task and their conversion into `judge::model::Task`.
//! Outbound events are `judge::model::Event` directly -- its `Serialize` impl already matches
//! the wire shape field-for-field, so no separate DTO is needed there.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use judge::model::{SubcheckConfig, SubcheckScore, Task, TaskLimits, TestCaseSpec};

use crate::{Error, ErrorKind, Result};

/// One entry of the inbound `test_case_config` array.
#[derive(Debug, Deserialize)]
struct WireTestCase {
    /// Present on the wire for the caller's own bookkeeping; the grading core identifies cases by
    /// `name`, not `id`.
    #[allow(dead_code)]
    id: Option<serde_json::Value>,

    name: String,
    score: i32,

    /// Canonically `u32`. A string-typed subcheck id on the wire fails to deserialize into this
    /// field and the whole task is rejected as malformed, rather than being silently coerced.
    subcheck: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireSubcheckScore {
    score: i32,
}

#[derive(Debug, Deserialize)]
struct WireLimit {
    max_cpu_time: u64,
    max_memory: u64,
}

/// The inbound grading task as received over the wire.
#[derive(Debug, Deserialize)]
pub struct WireTask {
    task_id: String,
    case_id: String,
    spj_id: Option<String>,
    test_case_config: Vec<WireTestCase>,

    #[serde(default)]
    subcheck_config: BTreeMap<u32, WireSubcheckScore>,

    code: String,
    lang: String,
    limit: WireLimit,
}

impl WireTask {
    /// Parse one length-prefixed frame's JSON payload into a `WireTask`.
    pub fn from_json(payload: &str) -> Result<WireTask> {
        serde_json::from_str(payload)
            .map_err(|e| Error::from(ErrorKind::MalformedTask(e.to_string())))
    }

    /// Convert this wire task into the grading core's internal `Task`.
    pub fn into_task(self) -> Task {
        let cases = self.test_case_config.into_iter()
            .map(|c| TestCaseSpec { name: c.name, score: c.score, subcheck_id: c.subcheck })
            .collect();

        let mut subchecks: SubcheckConfig = SubcheckConfig::new();
        for (id, score) in self.subcheck_config {
            subchecks.insert(id, SubcheckScore { score: score.score });
        }

        Task {
            task_id: self.task_id,
            case_bundle_id: self.case_id,
            spj_id: self.spj_id,
            cases,
            subchecks,
            source_code: self.code,
            language_tag: self.lang,
            limits: TaskLimits {
                max_cpu_time: Duration::from_millis(self.limit.max_cpu_time),
                max_memory_bytes: self.limit.max_memory,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_task() {
        let json = r#"{
            "task_id": "t1",
            "case_id": "bundle1",
            "test_case_config": [
                {"id": 1, "name": "test1", "score": 10},
                {"id": 2, "name": "test2", "score": 10, "subcheck": 1}
            ],
            "subcheck_config": {"1": {"score": 20}},
            "code": "int main(){return 0;}",
            "lang": "c",
            "limit": {"max_cpu_time": 1000, "max_memory": 134217728}
        }"#;

        let task = WireTask::from_json(json).unwrap().into_task();
        assert_eq!("t1", task.task_id);
        assert_eq!("bundle1", task.case_bundle_id);
        assert_eq!(2, task.cases.len());
        assert_eq!(Some(1), task.cases[1].subcheck_id);
        assert!(task.is_subtask_mode());
        assert_eq!(Duration::from_millis(1000), task.limits.max_cpu_time);
        assert_eq!(1, task.subchecks.len());
    }

    #[test]
    fn test_rejects_non_integer_subcheck_id() {
        let json = r#"{
            "task_id": "t1",
            "case_id": "bundle1",
            "test_case_config": [
                {"id": 1, "name": "test1", "score": 10, "subcheck": "group-a"}
            ],
            "subcheck_config": {},
            "code": "",
            "lang": "c",
            "limit": {"max_cpu_time": 1000, "max_memory": 1}
        }"#;

        assert!(WireTask::from_json(json).is_err());
    }

    #[test]
    fn test_missing_subcheck_config_defaults_to_empty() {
        let json = r#"{
            "task_id": "t1",
            "case_id": "bundle1",
            "test_case_config": [{"id": 1, "name": "test1", "score": 10}],
            "code": "",
            "lang": "c",
            "limit": {"max_cpu_time": 1000, "max_memory": 1}
        }"#;

        let task = WireTask::from_json(json).unwrap().into_task();
        assert!(task.subchecks.is_empty());
        assert!(!task.is_subtask_mode());
    }
}
