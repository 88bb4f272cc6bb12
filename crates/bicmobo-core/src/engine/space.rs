use crate::core::config::models::{Domain, ParameterConfig, ParameterSpec};
use crate::core::models::parameter::{Assignment, ParameterValue};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ParameterRangeError {
    #[error("Parameter '{name}' value {value} is outside [{min}, {max}]")]
    OutOfBounds {
        name: String,
        value: String,
        min: String,
        max: String,
    },
    #[error("Parameter '{name}' value {value} is not one of the configured choices")]
    NotInDomain { name: String, value: String },
    #[error("Parameter '{name}' expects {expected}, got {value}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        value: String,
    },
    #[error("Candidate is missing parameter '{0}'")]
    Missing(String),
    #[error("Candidate sets unknown parameter '{0}'")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
}

/// One dimension of the search space as handed to an optimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchDimension {
    Range {
        name: String,
        bounds: [f64; 2],
        value_type: ValueType,
    },
    Choice {
        name: String,
        values: Vec<ParameterValue>,
    },
}

impl SearchDimension {
    pub fn name(&self) -> &str {
        match self {
            SearchDimension::Range { name, .. } | SearchDimension::Choice { name, .. } => name,
        }
    }
}

/// The configured design parameters, in name order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    parameters: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new(config: &ParameterConfig) -> Self {
        Self {
            parameters: config.parameters.clone(),
        }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn describe(&self) -> Vec<SearchDimension> {
        self.parameters
            .iter()
            .map(|p| match &p.domain {
                Domain::Int { min, max } => SearchDimension::Range {
                    name: p.name.clone(),
                    bounds: [*min as f64, *max as f64],
                    value_type: ValueType::Int,
                },
                Domain::Float { min, max } => SearchDimension::Range {
                    name: p.name.clone(),
                    bounds: [*min, *max],
                    value_type: ValueType::Float,
                },
                Domain::Choice(values) => SearchDimension::Choice {
                    name: p.name.clone(),
                    values: values.clone(),
                },
            })
            .collect()
    }

    /// Number of distinct points when every dimension is discrete.
    pub fn cardinality(&self) -> Option<u128> {
        self.parameters.iter().try_fold(1u128, |acc, p| {
            let size = match &p.domain {
                Domain::Int { min, max } => (*max as i128 - *min as i128 + 1) as u128,
                Domain::Choice(values) => values.len() as u128,
                Domain::Float { min, max } if min == max => 1,
                Domain::Float { .. } => return None,
            };
            acc.checked_mul(size)
        })
    }

    /// Checks that `candidate` sets exactly the configured parameters, each inside its
    /// domain.
    pub fn validate(&self, candidate: &Assignment) -> Result<(), ParameterRangeError> {
        if let Some(unknown) = candidate.keys().find(|k| self.get(k).is_none()) {
            return Err(ParameterRangeError::Unknown(unknown.clone()));
        }
        for spec in &self.parameters {
            let value = candidate
                .get(&spec.name)
                .ok_or_else(|| ParameterRangeError::Missing(spec.name.clone()))?;
            validate_value(spec, value)?;
        }
        Ok(())
    }
}

fn validate_value(spec: &ParameterSpec, value: &ParameterValue) -> Result<(), ParameterRangeError> {
    match &spec.domain {
        Domain::Int { min, max } => {
            let v = value
                .as_i64()
                .ok_or_else(|| ParameterRangeError::TypeMismatch {
                    name: spec.name.clone(),
                    expected: "an integer",
                    value: value.to_string(),
                })?;
            if v < *min || v > *max {
                return Err(ParameterRangeError::OutOfBounds {
                    name: spec.name.clone(),
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Domain::Float { min, max } => {
            let v = value
                .as_f64()
                .ok_or_else(|| ParameterRangeError::TypeMismatch {
                    name: spec.name.clone(),
                    expected: "a number",
                    value: value.to_string(),
                })?;
            if !(v >= *min && v <= *max) {
                return Err(ParameterRangeError::OutOfBounds {
                    name: spec.name.clone(),
                    value: v.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Domain::Choice(values) => {
            let matches = values.iter().any(|allowed| match (allowed, value) {
                (ParameterValue::Text(a), ParameterValue::Text(b)) => a == b,
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                },
            });
            if !matches {
                return Err(ParameterRangeError::NotInDomain {
                    name: spec.name.clone(),
                    value: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::models::ParameterTarget;
    use proptest::prelude::*;

    fn spec(name: &str, domain: Domain) -> ParameterSpec {
        ParameterSpec {
            name: name.into(),
            domain,
            target: ParameterTarget::Reconstruction {
                path: format!("BEMC:{}", name),
                units: None,
            },
        }
    }

    fn space() -> ParameterSpace {
        ParameterSpace::new(&ParameterConfig {
            parameters: vec![
                spec("absorber", Domain::Choice(vec!["Pb".into(), "W".into()])),
                spec("cap_adc", Domain::Float { min: 1024.0, max: 16384.0 }),
                spec("enable_staves_2", Domain::Int { min: 0, max: 1 }),
            ],
        })
    }

    fn candidate(absorber: &str, cap: f64, staves: i64) -> Assignment {
        let mut a = Assignment::new();
        a.insert("absorber".into(), absorber.into());
        a.insert("cap_adc".into(), cap.into());
        a.insert("enable_staves_2".into(), staves.into());
        a
    }

    #[test]
    fn describe_produces_range_and_choice_dimensions() {
        let dims = space().describe();
        assert_eq!(dims.len(), 3);
        let json = serde_json::to_value(&dims).unwrap();
        assert_eq!(json[0]["type"], "choice");
        assert_eq!(json[1]["type"], "range");
        assert_eq!(json[1]["value_type"], "float");
        assert_eq!(json[2]["bounds"], serde_json::json!([0.0, 1.0]));
        assert_eq!(dims[2].name(), "enable_staves_2");
    }

    #[test]
    fn cardinality_only_for_discrete_spaces() {
        assert_eq!(space().cardinality(), None);
        let discrete = ParameterSpace::new(&ParameterConfig {
            parameters: vec![
                spec("a", Domain::Int { min: 0, max: 1 }),
                spec("b", Domain::Choice(vec![ParameterValue::Int(1), ParameterValue::Int(2), ParameterValue::Int(3)])),
            ],
        });
        assert_eq!(discrete.cardinality(), Some(6));
    }

    #[test]
    fn rejects_missing_unknown_and_mistyped_values() {
        let s = space();
        let mut missing = candidate("W", 2048.0, 1);
        missing.remove("cap_adc");
        assert_eq!(
            s.validate(&missing),
            Err(ParameterRangeError::Missing("cap_adc".into()))
        );

        let mut extra = candidate("W", 2048.0, 1);
        extra.insert("bogus".into(), ParameterValue::Int(1));
        assert_eq!(
            s.validate(&extra),
            Err(ParameterRangeError::Unknown("bogus".into()))
        );

        let mut mistyped = candidate("W", 2048.0, 1);
        mistyped.insert("enable_staves_2".into(), 0.5.into());
        assert!(matches!(
            s.validate(&mistyped),
            Err(ParameterRangeError::TypeMismatch { .. })
        ));

        assert!(matches!(
            s.validate(&candidate("Cu", 2048.0, 1)),
            Err(ParameterRangeError::NotInDomain { .. })
        ));
    }

    #[test]
    fn nan_is_out_of_bounds() {
        assert!(matches!(
            space().validate(&candidate("W", f64::NAN, 1)),
            Err(ParameterRangeError::OutOfBounds { .. })
        ));
    }

    proptest! {
        #[test]
        fn in_bounds_assignments_are_accepted(
            cap in 1024.0f64..=16384.0,
            staves in 0i64..=1,
            pick in any::<bool>(),
        ) {
            let absorber = if pick { "Pb" } else { "W" };
            prop_assert!(space().validate(&candidate(absorber, cap, staves)).is_ok());
        }

        #[test]
        fn one_coordinate_out_of_bounds_is_rejected(
            cap in 1024.0f64..=16384.0,
            staves in 0i64..=1,
            excess in 1.0f64..1.0e6,
            which in 0usize..2,
        ) {
            let point = match which {
                0 => candidate("W", 16384.0 + excess, staves),
                _ => candidate("W", cap, 1 + excess.ceil() as i64),
            };
            let rejected = matches!(
                space().validate(&point),
                Err(ParameterRangeError::OutOfBounds { .. })
            );
            prop_assert!(rejected);
        }
    }
}
