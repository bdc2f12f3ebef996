//! Scripted launch service for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CallLauncher, CallStatus, LaunchError, LaunchOutcome};
use crate::domain::Metadata;

/// Scripted response to one launch request
#[derive(Debug, Clone)]
pub enum MockLaunch {
    /// Accept with this call id
    Call(String),
    /// Accept without a call id
    NoCallId,
    /// Fail with this HTTP status
    Fail(u16),
}

/// One recorded launch request
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub origination_id: String,
    pub phone: String,
    pub metadata: Metadata,
}

/// Launch service double
///
/// Launches consume the script in order; once it runs out every launch
/// succeeds with a generated `call-N` id. Calls are active until marked
/// ended.
#[derive(Debug, Default)]
pub struct MockCallLauncher {
    script: Mutex<VecDeque<MockLaunch>>,
    launches: Mutex<Vec<LaunchRecord>>,
    statuses: Mutex<HashMap<String, CallStatus>>,
    failing_status: Mutex<HashMap<String, u16>>,
    status_queries: AtomicU64,
    counter: AtomicU64,
    latency: Option<Duration>,
}

impl MockCallLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to launches in this order
    pub fn with_script(script: Vec<MockLaunch>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Delay every launch by this long
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue another scripted response
    pub fn push(&self, launch: MockLaunch) {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push_back(launch);
    }

    /// Report a call as ended on the next status query
    pub fn end_call(&self, call_id: &str, reason: &str) {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(call_id.to_string(), CallStatus::ended(reason));
    }

    /// Make status queries for this call fail with this HTTP status
    pub fn fail_status(&self, call_id: &str, status: u16) {
        self.failing_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(call_id.to_string(), status);
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn status_queries(&self) -> u64 {
        self.status_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallLauncher for MockCallLauncher {
    async fn launch_call(
        &self,
        origination_id: &str,
        phone: &str,
        metadata: &Metadata,
    ) -> Result<LaunchOutcome, LaunchError> {
        self.launches.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(LaunchRecord {
            origination_id: origination_id.to_string(),
            phone: phone.to_string(),
            metadata: metadata.clone(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).pop_front();
        match next {
            Some(MockLaunch::Call(call_id)) => Ok(LaunchOutcome { call_id: Some(call_id) }),
            Some(MockLaunch::NoCallId) => Ok(LaunchOutcome { call_id: None }),
            Some(MockLaunch::Fail(status)) => Err(LaunchError::from_status(status, "scripted failure", None)),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(LaunchOutcome {
                    call_id: Some(format!("call-{}", n)),
                })
            }
        }
    }

    async fn get_call_status(&self, call_id: &str) -> Result<CallStatus, LaunchError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(call_id)
            .copied();
        if let Some(status) = failing {
            return Err(LaunchError::from_status(status, "status unavailable", None));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(call_id)
            .cloned()
            .unwrap_or_else(CallStatus::active))
    }
}
