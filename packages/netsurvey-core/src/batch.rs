//! Bounded parallel execution of one operation across many devices.

use crate::client::{Device, QueryError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Upper bound on devices processed at the same time
    pub max_workers: usize,
    /// Budget for one device's operation, retries included
    pub operation_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// How one device's operation ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceOutcome<T> {
    Success { data: T },
    Failed { error: String },
    FeatureNotAvailable { feature: String, message: String },
    Timeout { after_secs: f64 },
}

impl<T> DeviceOutcome<T> {
    fn from_result(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(data) => DeviceOutcome::Success { data },
            Err(QueryError::FeatureNotAvailable { feature, message }) => {
                DeviceOutcome::FeatureNotAvailable { feature, message }
            }
            Err(QueryError::Timeout(after)) => DeviceOutcome::Timeout {
                after_secs: after.as_secs_f64(),
            },
            Err(e) => DeviceOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceResult<T> {
    pub device_name: String,
    #[serde(flatten)]
    pub outcome: DeviceOutcome<T>,
    /// Seconds spent on this device, including time waiting for a worker
    pub execution_time: f64,
}

impl<T> DeviceResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DeviceOutcome::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match &self.outcome {
            DeviceOutcome::Success { data } => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_devices: usize,
    pub successful: usize,
    /// Failed or timed out
    pub failed: usize,
    pub feature_not_available: usize,
    pub timed_out: usize,
    /// Percentage of devices that succeeded, 0 for an empty batch
    pub success_rate: f64,
    pub execution_time: f64,
    pub operation_type: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult<T> {
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub results: Vec<DeviceResult<T>>,
}

impl<T> BatchResult<T> {
    /// Successful results with their device names, in input order.
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.results
            .iter()
            .filter_map(|r| r.data().map(|data| (r.device_name.as_str(), data)))
    }

    fn summarize(
        operation_type: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        results: Vec<DeviceResult<T>>,
    ) -> Self {
        let total = results.len();
        let count = |pred: fn(&DeviceOutcome<T>) -> bool| {
            results.iter().filter(|r| pred(&r.outcome)).count()
        };

        let successful = count(|o| matches!(o, DeviceOutcome::Success { .. }));
        let feature_not_available =
            count(|o| matches!(o, DeviceOutcome::FeatureNotAvailable { .. }));
        let timed_out = count(|o| matches!(o, DeviceOutcome::Timeout { .. }));
        let failed = count(|o| matches!(o, DeviceOutcome::Failed { .. })) + timed_out;

        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        BatchResult {
            summary: BatchSummary {
                total_devices: total,
                successful,
                failed,
                feature_not_available,
                timed_out,
                success_rate,
                execution_time: elapsed.as_secs_f64(),
                operation_type: operation_type.to_string(),
                started_at,
            },
            results,
        }
    }
}

/// Run `operation` once per device with at most `options.max_workers` in
/// flight.
///
/// Every device gets its own task. A device that exceeds
/// `options.operation_timeout` has its future dropped, which abandons any
/// retry backoff still pending, and is reported as a timeout. A panicking
/// operation is reported as a failure for that device only. Results come
/// back in the order of `devices`.
pub async fn run_batch<T, F, Fut>(
    devices: &[Device],
    operation_type: &str,
    options: &BatchOptions,
    operation: F,
) -> BatchResult<T>
where
    T: Send + 'static,
    F: Fn(Device) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    let started_at = Utc::now();
    let start = Instant::now();

    let workers = options.max_workers.min(devices.len()).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let operation = Arc::new(operation);
    let budget = options.operation_timeout;

    tracing::info!(
        "Running {} on {} devices with {} workers",
        operation_type,
        devices.len(),
        workers
    );

    let handles: Vec<_> = devices
        .iter()
        .cloned()
        .map(|device| {
            let semaphore = semaphore.clone();
            let operation = operation.clone();
            tokio::spawn(async move {
                let device_start = Instant::now();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match timeout(budget, operation(device)).await {
                        Ok(result) => result,
                        Err(_) => Err(QueryError::Timeout(budget)),
                    },
                    Err(_) => Err(QueryError::Other("worker pool closed".to_string())),
                };
                (result, device_start.elapsed())
            })
        })
        .collect();

    let joined = futures::future::join_all(handles).await;

    let results: Vec<DeviceResult<T>> = devices
        .iter()
        .zip(joined)
        .map(|(device, joined)| {
            let (outcome, elapsed) = match joined {
                Ok((result, elapsed)) => (DeviceOutcome::from_result(result), elapsed),
                Err(e) => (
                    DeviceOutcome::Failed {
                        error: format!("Task failed: {}", e),
                    },
                    Duration::ZERO,
                ),
            };

            match &outcome {
                DeviceOutcome::Success { .. } => {
                    tracing::debug!(
                        "Successfully processed device {} in {:.2}s",
                        device.name,
                        elapsed.as_secs_f64()
                    )
                }
                DeviceOutcome::FeatureNotAvailable { feature, .. } => tracing::info!(
                    "Feature '{}' not available on device {}",
                    feature,
                    device.name
                ),
                DeviceOutcome::Timeout { after_secs } => tracing::error!(
                    "Device {} timed out after {:.0}s",
                    device.name,
                    after_secs
                ),
                DeviceOutcome::Failed { error } => {
                    tracing::error!("Failed to process device {}: {}", device.name, error)
                }
            }

            DeviceResult {
                device_name: device.name.clone(),
                outcome,
                execution_time: elapsed.as_secs_f64(),
            }
        })
        .collect();

    let batch = BatchResult::summarize(operation_type, started_at, start.elapsed(), results);
    tracing::info!(
        "{} complete: {}/{} devices succeeded ({:.1}%) in {:.2}s",
        operation_type,
        batch.summary.successful,
        batch.summary.total_devices,
        batch.summary.success_rate,
        batch.summary.execution_time
    );
    batch
}
