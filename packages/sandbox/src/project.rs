// ABOUTME: Project identifiers and the volume/container names derived from them
// ABOUTME: The runtime's naming index is the only mapping between projects and sandboxes

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const PROJECT_PREFIX: &str = "project_";
pub const VOLUME_PREFIX: &str = "volume_";
pub const CONTAINER_PREFIX: &str = "container_";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid project id '{0}': expected project_<uuid>")]
pub struct InvalidProjectId(pub String);

/// Identifier of a project, rendered as `project_<uuid>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    pub fn volume_name(&self) -> String {
        format!("{}{}", VOLUME_PREFIX, self.0.hyphenated())
    }

    pub fn container_name(&self) -> String {
        format!("{}{}", CONTAINER_PREFIX, self.0.hyphenated())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PROJECT_PREFIX, self.0.hyphenated())
    }
}

impl FromStr for ProjectId {
    type Err = InvalidProjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let suffix = s
            .strip_prefix(PROJECT_PREFIX)
            .ok_or_else(|| InvalidProjectId(s.to_string()))?;

        let uuid = Uuid::parse_str(suffix).map_err(|_| InvalidProjectId(s.to_string()))?;

        // Only the canonical lowercase hyphenated form maps back to the same names
        if uuid.hyphenated().to_string() != suffix {
            return Err(InvalidProjectId(s.to_string()));
        }

        Ok(Self(uuid))
    }
}

impl Serialize for ProjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_names_derive_from_uuid() {
        let uuid = Uuid::parse_str("5222ccb5-b267-41a8-9bd5-aa8894fee495").unwrap();
        let project = ProjectId::from_uuid(uuid);

        assert_eq!(
            project.to_string(),
            "project_5222ccb5-b267-41a8-9bd5-aa8894fee495"
        );
        assert_eq!(
            project.volume_name(),
            "volume_5222ccb5-b267-41a8-9bd5-aa8894fee495"
        );
        assert_eq!(
            project.container_name(),
            "container_5222ccb5-b267-41a8-9bd5-aa8894fee495"
        );
    }

    #[test]
    fn test_parse_round_trips_display() {
        let project = ProjectId::generate();
        let parsed: ProjectId = project.to_string().parse().unwrap();
        assert_eq!(parsed, project);
        assert_eq!(parsed.container_name(), project.container_name());
    }

    #[rstest]
    #[case("")]
    #[case("project_")]
    #[case("5222ccb5-b267-41a8-9bd5-aa8894fee495")]
    #[case("container_5222ccb5-b267-41a8-9bd5-aa8894fee495")]
    #[case("project_not-a-uuid")]
    #[case("project_5222CCB5-B267-41A8-9BD5-AA8894FEE495")]
    #[case("project_5222ccb5b26741a89bd5aa8894fee495")]
    fn test_parse_rejects_malformed(#[case] input: &str) {
        let result = input.parse::<ProjectId>();
        assert_eq!(result, Err(InvalidProjectId(input.to_string())));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let project = ProjectId::generate();
        let json = serde_json::to_string(&project).unwrap();
        assert_eq!(json, format!("\"{}\"", project));

        let back: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, project);
        assert!(serde_json::from_str::<ProjectId>("\"project_nope\"").is_err());
    }
}
