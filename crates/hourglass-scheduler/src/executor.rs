use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::types::TaskKind;

/// Performs the actual work of a job given its parameters.
///
/// Implementations report failure through `Err`; the engine records the
/// error's description on the job and keeps scheduling it.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The task kind this executor handles.
    fn kind(&self) -> TaskKind;

    async fn execute(&self, job_id: i64, parameters: &Map<String, Value>) -> Result<()>;
}

/// Maps each [`TaskKind`] to the executor that runs it.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in email and calculation executors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmailExecutor));
        registry.register(Arc::new(CalculationExecutor));
        registry
    }

    /// Register `executor` for its kind, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&kind).cloned()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Email notification dispatch.
///
/// Parameters: `to` (address or list of addresses, required), `subject`,
/// `body`. Delivery is logged; plug in a transport by registering another
/// executor for [`TaskKind::Email`].
pub struct EmailExecutor;

#[async_trait]
impl TaskExecutor for EmailExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Email
    }

    async fn execute(&self, job_id: i64, parameters: &Map<String, Value>) -> Result<()> {
        let recipients = recipients(parameters)?;
        let subject = parameters
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(no subject)");
        let body_len = parameters
            .get("body")
            .and_then(Value::as_str)
            .map_or(0, str::len);

        info!(job_id, to = ?recipients, subject, body_len, "sending email");
        Ok(())
    }
}

fn recipients(parameters: &Map<String, Value>) -> Result<Vec<String>> {
    let list = match parameters.get("to") {
        Some(Value::String(addr)) => vec![addr.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SchedulerError::Execution("'to' must contain only strings".to_string()))?,
        Some(_) => {
            return Err(SchedulerError::Execution(
                "'to' must be a string or a list of strings".to_string(),
            ))
        }
        None => {
            return Err(SchedulerError::Execution(
                "email job is missing the 'to' parameter".to_string(),
            ))
        }
    };
    if let Some(bad) = list.iter().find(|addr| !addr.contains('@')) {
        return Err(SchedulerError::Execution(format!(
            "invalid recipient address '{bad}'"
        )));
    }
    if list.is_empty() {
        return Err(SchedulerError::Execution("email job has no recipients".to_string()));
    }
    Ok(list)
}

/// Aggregate over a list of numbers.
///
/// Parameters: `operation` (`sum`, `product`, `min`, `max`, `mean`; default
/// `sum`) and `values` (non-empty array of numbers).
pub struct CalculationExecutor;

#[async_trait]
impl TaskExecutor for CalculationExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Calculation
    }

    async fn execute(&self, job_id: i64, parameters: &Map<String, Value>) -> Result<()> {
        let operation = parameters
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("sum");
        let values = numbers(parameters)?;
        let result = calculate(operation, &values)?;
        info!(job_id, operation, count = values.len(), result, "calculation finished");
        Ok(())
    }
}

fn numbers(parameters: &Map<String, Value>) -> Result<Vec<f64>> {
    let items = parameters
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SchedulerError::Execution("calculation job requires a 'values' array".to_string())
        })?;
    items
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                SchedulerError::Execution(format!("non-numeric value {v} in 'values'"))
            })
        })
        .collect()
}

pub fn calculate(operation: &str, values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(SchedulerError::Execution("'values' is empty".to_string()));
    }
    let result = match operation {
        "sum" => values.iter().sum(),
        "product" => values.iter().product(),
        "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "mean" => values.iter().sum::<f64>() / values.len() as f64,
        other => {
            return Err(SchedulerError::Execution(format!(
                "unsupported operation '{other}'"
            )))
        }
    };
    Ok(result)
}
