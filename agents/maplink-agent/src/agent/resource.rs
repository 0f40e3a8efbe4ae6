//! Resource Identifier
//!
//! Durable name the execution platform issues for a deployed agent:
//! `projects/<number>/locations/<location>/reasoningEngines/<id>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MaplinkError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentifier {
    project: String,
    location: String,
    engine_id: String,
}

impl ResourceIdentifier {
    pub fn new(project: &str, location: &str, engine_id: &str) -> Result<Self, MaplinkError> {
        format!("projects/{project}/locations/{location}/reasoningEngines/{engine_id}").parse()
    }

    /// Project number segment
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Trailing reasoning engine id
    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }
}

impl FromStr for ResourceIdentifier {
    type Err = MaplinkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MaplinkError::InvalidResourceIdentifier {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = value.trim().split('/').collect();
        let [projects, project, locations, location, engines, engine_id] = segments.as_slice()
        else {
            return Err(invalid(
                "expected projects/<num>/locations/<loc>/reasoningEngines/<id>",
            ));
        };

        if *projects != "projects" || *locations != "locations" || *engines != "reasoningEngines" {
            return Err(invalid(
                "expected projects/<num>/locations/<loc>/reasoningEngines/<id>",
            ));
        }
        if [project, location, engine_id].iter().any(|s| s.is_empty()) {
            return Err(invalid("empty path segment"));
        }
        if !project.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("project segment must be the numeric project number"));
        }

        Ok(Self {
            project: project.to_string(),
            location: location.to_string(),
            engine_id: engine_id.to_string(),
        })
    }
}

impl TryFrom<String> for ResourceIdentifier {
    type Error = MaplinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceIdentifier> for String {
    fn from(value: ResourceIdentifier) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/reasoningEngines/{}",
            self.project, self.location, self.engine_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let id: ResourceIdentifier = "projects/123/locations/us-central1/reasoningEngines/abc"
            .parse()
            .unwrap();
        assert_eq!(id.project(), "123");
        assert_eq!(id.location(), "us-central1");
        assert_eq!(id.engine_id(), "abc");
        assert_eq!(
            id.to_string(),
            "projects/123/locations/us-central1/reasoningEngines/abc"
        );
    }

    #[test]
    fn test_reject_malformed() {
        for value in [
            "",
            "abc",
            "projects/123/locations/us-central1",
            "projects/123/locations/us-central1/reasoningEngines/",
            "projects/my-project/locations/us-central1/reasoningEngines/abc",
            "projects/123/regions/us-central1/reasoningEngines/abc",
            "projects/123/locations/us-central1/reasoningEngines/abc/extra",
        ] {
            let err = value.parse::<ResourceIdentifier>().unwrap_err();
            assert_eq!(err.kind(), "InvalidResourceIdentifier", "accepted {value:?}");
        }
    }

    #[test]
    fn test_serde_goes_through_validation() {
        let id: ResourceIdentifier =
            serde_json::from_str("\"projects/9/locations/europe-west1/reasoningEngines/77\"")
                .unwrap();
        assert_eq!(id.engine_id(), "77");
        assert!(serde_json::from_str::<ResourceIdentifier>("\"nope\"").is_err());
    }
}
