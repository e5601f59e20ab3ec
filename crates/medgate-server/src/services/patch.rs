use medgate_core::{AdministrativeGender, CoreError, Patient, Result, parse_date};
use serde_json::{Map, Value};

/// Partial update of a local patient.
///
/// Built leniently from a JSON object: recognised keys with the wrong type
/// and unknown keys are ignored, so a body that matches nothing is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientPatch {
    pub active: Option<bool>,
    pub family: Option<String>,
    pub given: Option<String>,
    pub gender: Option<AdministrativeGender>,
    /// Already validated as `YYYY-MM-DD`.
    pub birth_date: Option<String>,
}

impl PatientPatch {
    /// Reads a patch from a request body. Only a non-object body is an error.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::invalid("patch body must be a JSON object"))?;
        Ok(Self::from_map(obj))
    }

    fn from_map(obj: &Map<String, Value>) -> Self {
        let string = |key: &str| obj.get(key).and_then(Value::as_str);

        Self {
            active: obj.get("active").and_then(Value::as_bool),
            family: string("family").map(str::to_owned),
            given: string("given").map(str::to_owned),
            gender: string("gender").and_then(|g| g.parse().ok()),
            birth_date: string("birthDate")
                .filter(|d| parse_date(d).is_ok())
                .map(str::to_owned),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the recognised fields to `patient` in place.
    ///
    /// `family` and `given` target `name[0]`, which is created when missing.
    /// `given` replaces the whole given-name list.
    pub fn apply(&self, patient: &mut Patient) {
        if let Some(active) = self.active {
            patient.active = Some(active);
        }
        if let Some(family) = &self.family {
            patient.primary_name_mut().family = Some(family.clone());
        }
        if let Some(given) = &self.given {
            patient.primary_name_mut().given = Some(vec![given.clone()]);
        }
        if let Some(gender) = self.gender {
            patient.gender = Some(gender);
        }
        if let Some(birth_date) = &self.birth_date {
            patient.birth_date = Some(birth_date.clone());
        }
    }
}
