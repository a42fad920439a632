//! Volume Custom Resource Definition

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use regex::Regex;
use schemars::gen::SchemaGenerator;
use schemars::schema::{
    InstanceType, ObjectValidation, Schema, SchemaObject, StringValidation, SubschemaValidation,
};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use super::quantity::parse_quantity;
use crate::error::{Error, Result};

/// Finalizer that keeps a Volume around until its zvol has been destroyed
pub const VOLUME_CLEANUP_FINALIZER: &str = "volume.zfs.unstable.cloud/cleanup";

/// Resource name consulted in `spec.capacity`
pub const STORAGE_RESOURCE: &str = "storage";

/// Condition type reporting whether the zvol matches the spec
pub const VOLUME_CONDITION_READY: &str = "Ready";

/// Pattern every `spec.volumeName` has to match
pub const VOLUME_NAME_PATTERN: &str = r"^[-A-Za-z0-9]+(/[-A-Za-z0-9]+)+$";

/// Pattern the API server applies to string quantities
pub const QUANTITY_PATTERN: &str = r"^(\+|-)?(([0-9]+(\.[0-9]*)?)|(\.[0-9]+))(([KMGTPE]i)|[numkMGTPE]|([eE](\+|-)?(([0-9]+(\.[0-9]*)?)|(\.[0-9]+))))?$";

lazy_static::lazy_static! {
    static ref VOLUME_NAME_RE: Regex = Regex::new(VOLUME_NAME_PATTERN).unwrap();
}

/// Volume resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "zfs.unstable.cloud",
    version = "v1alpha1",
    kind = "Volume",
    plural = "volumes",
    singular = "volume",
    shortname = "vol",
    status = "VolumeStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Volume", "type": "string", "jsonPath": ".spec.volumeName"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Node whose agent owns this volume
    pub node_name: String,

    /// Full zvol name, e.g. `tank/k8s/pvc-1234`
    #[schemars(schema_with = "volume_name_schema")]
    pub volume_name: String,

    /// Desired resources of the volume; only `storage` is read, and only
    /// when the zvol is created
    #[serde(deserialize_with = "deserialize_capacity")]
    #[schemars(schema_with = "capacity_schema")]
    pub capacity: BTreeMap<String, Quantity>,

    /// Desired zfs properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

fn volume_name_schema(_: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        string: Some(Box::new(StringValidation {
            pattern: Some(VOLUME_NAME_PATTERN.to_string()),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

/// Resource list whose values are int-or-string quantities
fn capacity_schema(_: &mut SchemaGenerator) -> Schema {
    let quantity = SchemaObject {
        subschemas: Some(Box::new(SubschemaValidation {
            any_of: Some(vec![
                SchemaObject {
                    instance_type: Some(InstanceType::Integer.into()),
                    ..Default::default()
                }
                .into(),
                SchemaObject {
                    instance_type: Some(InstanceType::String.into()),
                    ..Default::default()
                }
                .into(),
            ]),
            ..Default::default()
        })),
        string: Some(Box::new(StringValidation {
            pattern: Some(QUANTITY_PATTERN.to_string()),
            ..Default::default()
        })),
        extensions: [(
            "x-kubernetes-int-or-string".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };

    SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        object: Some(Box::new(ObjectValidation {
            additional_properties: Some(Box::new(quantity.into())),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrQuantity {
    Int(i64),
    Quantity(String),
}

/// Accepts `storage: 1073741824` as well as `storage: 1Gi`
fn deserialize_capacity<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Quantity>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, IntOrQuantity>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| {
            let quantity = match value {
                IntOrQuantity::Int(n) => Quantity(n.to_string()),
                IntOrQuantity::Quantity(s) => Quantity(s),
            };
            (name, quantity)
        })
        .collect())
}

/// Volume status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    /// Current conditions of the volume, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VolumeCondition>,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: ConditionStatus,

    /// Last time the status changed value
    pub last_transition_time: DateTime<Utc>,

    /// One-word CamelCase reason for the last update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Condition status values
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Volume {
    /// Set a condition, clearing its reason and message.
    pub fn set_condition(&mut self, type_: &str, status: ConditionStatus, now: DateTime<Utc>) {
        self.upsert_condition(type_, status, None, None, now);
    }

    /// Set a condition together with a reason and message.
    ///
    /// `last_transition_time` only moves when `status` differs from the
    /// stored value; reason and message are always overwritten.
    pub fn set_condition_reason(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.upsert_condition(
            type_,
            status,
            Some(reason.into()),
            Some(message.into()),
            now,
        );
    }

    fn upsert_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: Option<String>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) {
        let conditions = &mut self.status.get_or_insert_with(VolumeStatus::default).conditions;

        match conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(cond) => {
                if cond.status != status {
                    cond.status = status;
                    cond.last_transition_time = now;
                }
                cond.reason = reason;
                cond.message = message;
            }
            None => conditions.push(VolumeCondition {
                type_: type_.to_string(),
                status,
                last_transition_time: now,
                reason,
                message,
            }),
        }
    }

    /// Condition of the given type, if present
    pub fn get_condition(&self, type_: &str) -> Option<&VolumeCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == type_)
    }

    /// Whether the Ready condition is True
    pub fn is_ready(&self) -> bool {
        self.get_condition(VOLUME_CONDITION_READY)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether deletion has been requested for this record
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Add a finalizer, returning `true` if it was not present before
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers_mut().push(finalizer.to_string());
        true
    }

    /// Remove a finalizer, returning `true` if it was present
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        if !self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers_mut().retain(|f| f != finalizer);
        true
    }

    /// Requested size in bytes, read from `spec.capacity.storage`
    pub fn capacity_bytes(&self) -> Result<u64> {
        let quantity = self.spec.capacity.get(STORAGE_RESOURCE).ok_or_else(|| {
            Error::validation(format!("capacity.{} must be specified", STORAGE_RESOURCE))
        })?;
        parse_quantity(&quantity.0)
    }
}

/// Whether `name` matches [`VOLUME_NAME_PATTERN`]
pub fn is_valid_volume_name(name: &str) -> bool {
    VOLUME_NAME_RE.is_match(name)
}
