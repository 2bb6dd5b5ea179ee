use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    error::{Result, SchedulerError},
    schedule::{ScheduleType, Trigger},
    store::JobStore,
    types::{Job, JobPatch, NewJob, TaskKind},
};

pub const DEFAULT_LIMIT: u32 = 100;

/// Client input for creating a job. Everything is optional here so that
/// missing fields surface as validation errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateJobRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub job_type: Option<String>,
    pub schedule_type: Option<String>,
    pub schedule_config: Option<Value>,
    pub parameters: Option<Value>,
}

/// Client input for a partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub job_type: Option<String>,
    pub schedule_type: Option<String>,
    pub schedule_config: Option<Value>,
    pub parameters: Option<Value>,
}

/// Distinguishes an explicit `null` (clear) from an absent field.
fn double_option<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Validating facade over [`JobStore`] used by the HTTP layer.
#[derive(Clone)]
pub struct JobService {
    store: Arc<JobStore>,
}

impl JobService {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Jobs in creation order, skipping `skip` and returning at most `limit`.
    pub fn list(&self, skip: u32, limit: u32) -> Result<Vec<Job>> {
        self.store.list_page(skip, limit)
    }

    pub fn get(&self, id: i64) -> Result<Job> {
        self.store.get(id)
    }

    pub fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let name = required_name(req.name)?;
        let task_kind: TaskKind = required(req.job_type, "job_type")?.parse()?;
        let schedule_type: ScheduleType = required(req.schedule_type, "schedule_type")?.parse()?;
        let config = req.schedule_config.ok_or_else(|| {
            SchedulerError::Validation("schedule_config is required".to_string())
        })?;
        let trigger = Trigger::from_config(schedule_type, &config)?;
        let parameters = parameters(req.parameters)?.unwrap_or_default();

        self.store.create(NewJob {
            name,
            description: req.description,
            task_kind,
            trigger,
            parameters,
        })
    }

    /// Validate the whole request before anything is written.
    pub fn update(&self, id: i64, req: UpdateJobRequest) -> Result<Job> {
        let current = self.store.get(id)?;

        let task_kind = match req.job_type {
            Some(raw) => {
                let kind: TaskKind = raw.parse()?;
                if kind != current.task_kind {
                    return Err(SchedulerError::ImmutableField { field: "job_type" });
                }
                Some(kind)
            }
            None => None,
        };
        if let Some(raw) = req.schedule_type {
            let schedule_type: ScheduleType = raw.parse()?;
            if schedule_type != current.trigger.schedule_type() {
                return Err(SchedulerError::ImmutableField {
                    field: "schedule_type",
                });
            }
        }
        let trigger = req
            .schedule_config
            .map(|config| Trigger::from_config(current.trigger.schedule_type(), &config))
            .transpose()?;
        let name = req.name.map(|n| required_name(Some(n))).transpose()?;

        self.store.update(
            id,
            JobPatch {
                name,
                description: req.description,
                is_active: req.is_active,
                task_kind,
                trigger,
                parameters: parameters(req.parameters)?,
            },
        )
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        self.store.delete(id)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| SchedulerError::Validation(format!("{field} is required")))
}

fn required_name(name: Option<String>) -> Result<String> {
    let name = required(name, "name")?;
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::Validation("name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// `null` and absent mean no parameters; anything else must be an object.
fn parameters(value: Option<Value>) -> Result<Option<Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(SchedulerError::Validation(
            "parameters must be a JSON object".to_string(),
        )),
    }
}
