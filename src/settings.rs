//! Functions for loading sort settings.

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A structure containing configuration data for a sort, which is used to
/// specify the switch-over between in-place recursion and spawned tasks, and
/// where spawned tasks are executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortParams {
    /// Partitions nested deeper than this are handed off to a new task instead of
    /// being sorted by a recursive call. Zero spawns a task for every partition.
    pub max_recursion_depth: usize,
    /// Where spawned tasks are executed.
    pub executor: ExecutorParams,
    /// Keeps every error reported by tasks instead of the first one only.
    pub collect_all_errors: bool,
}

impl Default for SortParams {
    fn default() -> Self {
        SortParams {
            max_recursion_depth: 8,
            executor: ExecutorParams::default(),
            collect_all_errors: false,
        }
    }
}

impl SortParams {
    /// Parses settings from a JSON document. Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutorParams {
    /// Every task gets a thread of its own. The number of live threads is not
    /// bounded, so adversarial inputs could exhaust the thread limit of the system.
    ThreadPerTask { stack_size: Option<usize> },
    /// Tasks are submitted to a fixed-size thread pool.
    Pool(PoolParams),
}

impl Default for ExecutorParams {
    fn default() -> Self {
        ExecutorParams::Pool(PoolParams::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    /// Number of worker threads, at least one worker is always spawned.
    pub num_threads: usize,
    /// Stack size of worker threads, uses the platform default if `None`.
    pub stack_size: Option<usize>,
}

impl Default for PoolParams {
    fn default() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|v| v.get())
            .unwrap_or(4);

        PoolParams {
            num_threads,
            stack_size: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let params = SortParams::default();
        assert_eq!(params.max_recursion_depth, 8);
        assert!(!params.collect_all_errors);

        match params.executor {
            ExecutorParams::Pool(pool) => assert!(pool.num_threads >= 1),
            _ => panic!("pool executor expected"),
        }
    }

    #[test]
    fn json() {
        let params = SortParams::from_json(
            r#"{ "max_recursion_depth": 2, "executor": { "ThreadPerTask": { "stack_size": 65536 } } }"#,
        )
        .unwrap();

        assert_eq!(params.max_recursion_depth, 2);
        assert_eq!(
            params.executor,
            ExecutorParams::ThreadPerTask {
                stack_size: Some(65536)
            }
        );

        let params = SortParams::from_json(r#"{ "executor": { "Pool": { "num_threads": 3 } } }"#).unwrap();
        assert_eq!(params.max_recursion_depth, 8);
        assert_eq!(
            params.executor,
            ExecutorParams::Pool(PoolParams {
                num_threads: 3,
                stack_size: None
            })
        );

        assert!(SortParams::from_json("{ \"max_recursion_depth\": -1 }").is_err());
    }
}
