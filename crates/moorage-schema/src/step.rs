use serde::{Deserialize, Serialize};

/// An opaque workflow step. Only the fields requirement extraction looks at
/// are modelled; anything else in the source document is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl Step {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            kind: "shell".to_owned(),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_list_ignoring_extra_fields() {
        let json = r#"[
            {"type": "mkdir", "target": "/tmp/out"},
            {"type": "docker_exec", "target": "x", "container": "c1", "timeout": 30},
            {"type": "shell", "command": "docker exec c2 ls"}
        ]"#;
        let steps: Vec<Step> = serde_json::from_str(json).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].kind, "mkdir");
        assert_eq!(steps[1].container.as_deref(), Some("c1"));
        assert_eq!(steps[2].target, "");
        assert_eq!(steps[2].command.as_deref(), Some("docker exec c2 ls"));
    }

    #[test]
    fn serializes_kind_as_type() {
        let json = serde_json::to_value(Step::new("touch", "/tmp/a")).unwrap();
        assert_eq!(json["type"], "touch");
        assert!(json.get("command").is_none());
    }
}
