//! Replicated entity and user records

use crate::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type Attributes = HashMap<String, String>;

/// Attribute key carrying a user's lobby readiness
pub const READY_STATE_KEY: &str = "readyState";
pub const READY: &str = "ready";
pub const NOT_READY: &str = "waiting";

/// A replicated world object owned by exactly one connection
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkedEntity {
    pub id: String,
    pub owner_id: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub velocity: Vec3,
    #[serde(default)]
    pub attributes: Attributes,
    /// Server time (ms) of the last authoritative write
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_id: Option<String>,
}

impl NetworkedEntity {
    pub fn new(id: String, owner_id: String, timestamp: f64) -> Self {
        Self {
            id,
            owner_id,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            velocity: Vec3::ZERO,
            attributes: Attributes::new(),
            timestamp,
            creation_id: None,
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position.rounded();
    }

    pub fn field(&self, field: TransformField) -> f32 {
        use TransformField::*;
        match field {
            XPos => self.position.x,
            YPos => self.position.y,
            ZPos => self.position.z,
            XRot => self.rotation.x,
            YRot => self.rotation.y,
            ZRot => self.rotation.z,
            WRot => self.rotation.w,
            XScale => self.scale.x,
            YScale => self.scale.y,
            ZScale => self.scale.z,
            XVel => self.velocity.x,
            YVel => self.velocity.y,
            ZVel => self.velocity.z,
        }
    }

    /// Writes a single transform component; position components are rounded
    pub fn set_field(&mut self, field: TransformField, value: f32) {
        use TransformField::*;
        match field {
            XPos => self.position.x = crate::math::round4(value),
            YPos => self.position.y = crate::math::round4(value),
            ZPos => self.position.z = crate::math::round4(value),
            XRot => self.rotation.x = value,
            YRot => self.rotation.y = value,
            ZRot => self.rotation.z = value,
            WRot => self.rotation.w = value,
            XScale => self.scale.x = value,
            YScale => self.scale.y = value,
            ZScale => self.scale.z = value,
            XVel => self.velocity.x = value,
            YVel => self.velocity.y = value,
            ZVel => self.velocity.z = value,
        }
    }

    /// Transform components whose values differ from `previous`
    pub fn transform_changes(&self, previous: &NetworkedEntity) -> Vec<(TransformField, f32)> {
        TransformField::ALL
            .iter()
            .filter(|field| self.field(**field) != previous.field(**field))
            .map(|field| (*field, self.field(*field)))
            .collect()
    }
}

/// Top-level entity fields addressable from an `entityUpdate` change list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformField {
    XPos,
    YPos,
    ZPos,
    XRot,
    YRot,
    ZRot,
    WRot,
    XScale,
    YScale,
    ZScale,
    XVel,
    YVel,
    ZVel,
}

impl TransformField {
    pub const ALL: [TransformField; 13] = [
        TransformField::XPos,
        TransformField::YPos,
        TransformField::ZPos,
        TransformField::XRot,
        TransformField::YRot,
        TransformField::ZRot,
        TransformField::WRot,
        TransformField::XScale,
        TransformField::YScale,
        TransformField::ZScale,
        TransformField::XVel,
        TransformField::YVel,
        TransformField::ZVel,
    ];

    pub fn as_str(self) -> &'static str {
        use TransformField::*;
        match self {
            XPos => "xPos",
            YPos => "yPos",
            ZPos => "zPos",
            XRot => "xRot",
            YRot => "yRot",
            ZRot => "zRot",
            WRot => "wRot",
            XScale => "xScale",
            YScale => "yScale",
            ZScale => "zScale",
            XVel => "xVel",
            YVel => "yVel",
            ZVel => "zVel",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        TransformField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == name)
    }
}

/// A connected (or reconnecting) participant of the room
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkedUser {
    pub id: String,
    pub session_id: String,
    pub connected: bool,
    #[serde(default)]
    pub attributes: Attributes,
    pub timestamp: f64,
}

impl NetworkedUser {
    pub fn new(id: String, session_id: String, timestamp: f64) -> Self {
        Self {
            id,
            session_id,
            connected: true,
            attributes: Attributes::new(),
            timestamp,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.attributes.get(READY_STATE_KEY).map(String::as_str) == Some(READY)
    }
}

/// Coerces an arbitrary JSON value into the string form attributes are stored in
pub fn attribute_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Reads a JSON number or numeric string
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Formats a number the way attribute strings carry it (`8`, not `8.0`)
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}
