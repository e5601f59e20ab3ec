//! FHIR R4 `Patient` resource, modelled only as deep as the gateway needs.
//!
//! Fields the gateway never inspects are kept in `extra` maps so a document
//! survives decode/encode without losing data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

pub const PATIENT_RESOURCE_TYPE: &str = "Patient";

fn patient_resource_type() -> String {
    PATIENT_RESOURCE_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(rename = "resourceType", default = "patient_resource_type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<Vec<HumanName>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<AdministrativeGender>,
    #[serde(rename = "birthDate", skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    /// Every other Patient element (telecom, address, meta, extensions, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Patient {
    fn default() -> Self {
        Self {
            resource_type: patient_resource_type(),
            id: None,
            active: None,
            name: None,
            gender: None,
            birth_date: None,
            extra: Map::new(),
        }
    }
}

impl Patient {
    /// Decodes a Patient from JSON bytes, rejecting other resource types.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let patient: Patient = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::invalid(format!("Invalid Patient JSON: {e}")))?;
        patient.ensure_resource_type()?;
        Ok(patient)
    }

    /// Fails unless `resourceType` is `Patient`.
    pub fn ensure_resource_type(&self) -> Result<()> {
        if self.resource_type != PATIENT_RESOURCE_TYPE {
            return Err(CoreError::invalid(format!(
                "expected resourceType 'Patient', got '{}'",
                self.resource_type
            )));
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CoreError::internal(format!("Failed to serialize Patient: {e}")))
    }

    /// First entry of `name`, if any.
    pub fn primary_name(&self) -> Option<&HumanName> {
        self.name.as_ref().and_then(|names| names.first())
    }

    /// First entry of `name`, inserting an empty one when the list is absent or empty.
    pub fn primary_name_mut(&mut self) -> &mut HumanName {
        let names = self.name.get_or_insert_with(Vec::new);
        if names.is_empty() {
            names.push(HumanName::default());
        }
        &mut names[0]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HumanName {
    pub fn new(family: impl Into<String>, given: impl Into<String>) -> Self {
        Self {
            family: Some(family.into()),
            given: Some(vec![given.into()]),
            extra: Map::new(),
        }
    }

    pub fn first_given(&self) -> Option<&str> {
        self.given
            .as_ref()
            .and_then(|given| given.first())
            .map(String::as_str)
    }
}

/// FHIR `AdministrativeGender` value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdministrativeGender {
    Male,
    Female,
    Other,
    Unknown,
}

impl AdministrativeGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AdministrativeGender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdministrativeGender {
    type Err = CoreError;

    /// Only the exact lowercase codes are accepted.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            "unknown" => Ok(Self::Unknown),
            _ => Err(CoreError::invalid(format!(
                "'{s}' is not an AdministrativeGender code"
            ))),
        }
    }
}
