//! Docker API 1.49 extras: BuildKit progress, registry search, platform
//! aware image listings and image build info.

use super::probes::api_version_at_least;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

static STEP_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(\d+) \[([^\]]+)\]").expect("step header regex"));
static STEP_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(\d+) (\d+\.\d+) (.+)$").expect("step progress regex"));
static STEP_DONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(\d+) (DONE|CACHED)\b").expect("step done regex"));
static STEP_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(\d+) ERROR\b").expect("step error regex"));

pub const FEATURE_MIN_API: (u32, u32) = (1, 49);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiFeature {
    pub name: &'static str,
    pub available: bool,
    pub min_version: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiFeatures {
    pub version: String,
    pub api_1_49_supported: bool,
    pub supported_features: usize,
    pub total_features: usize,
    pub features: Vec<ApiFeature>,
}

const FEATURE_TABLE: [(&str, &str, &str); 4] = [
    (
        "BuildKit build progress",
        "Detailed build progress events from BuildKit",
        "docker buildx build --progress=plain -t test .",
    ),
    (
        "Registry search enhancements",
        "Registry search with official/automated/stars filters",
        "docker search --filter is-official=true ubuntu",
    ),
    (
        "Multi-platform image listing",
        "Platform information in image listings",
        "docker images --format '{{json .}}'",
    ),
    (
        "Enhanced build info",
        "BuildKit labels and layer history for images",
        "docker image inspect --format '{{json .}}' <image>",
    ),
];

/// Which API 1.49 features a daemon reporting `api_version` offers.
pub fn api_features(api_version: &str) -> ApiFeatures {
    let supported = api_version_at_least(api_version, FEATURE_MIN_API.0, FEATURE_MIN_API.1);
    let features: Vec<ApiFeature> = FEATURE_TABLE
        .into_iter()
        .map(|(name, description, example)| ApiFeature {
            name,
            available: supported,
            min_version: "1.49",
            description,
            example,
        })
        .collect();
    ApiFeatures {
        version: api_version.to_string(),
        api_1_49_supported: supported,
        supported_features: features.iter().filter(|f| f.available).count(),
        total_features: features.len(),
        features,
    }
}

/// Quotes a value for a POSIX shell command line.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub tag: String,
    pub context: String,
    pub build_args: Vec<(String, String)>,
    pub platforms: Vec<String>,
}

impl BuildRequest {
    pub fn new(tag: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            context: context.into(),
            ..Self::default()
        }
    }

    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.push((key.into(), value.into()));
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platforms.push(platform.into());
        self
    }

    /// `docker buildx build` with plain progress output.
    pub fn command(&self) -> String {
        let mut command = "docker buildx build --progress=plain".to_string();
        for (key, value) in &self.build_args {
            command.push_str(&format!(" --build-arg {}", shell_quote(&format!("{}={}", key, value))));
        }
        if !self.platforms.is_empty() {
            command.push_str(&format!(" --platform={}", shell_quote(&self.platforms.join(","))));
        }
        command.push_str(&format!(
            " -t {} {}",
            shell_quote(&self.tag),
            shell_quote(&self.context)
        ));
        command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStep {
    pub progress: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStage {
    pub name: String,
    pub status: StageStatus,
    pub steps: Vec<BuildStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildProgress {
    pub stages: Vec<BuildStage>,
    pub completed: bool,
    pub failed: bool,
}

impl BuildProgress {
    pub fn stage(&self, name: &str) -> Option<&BuildStage> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

/// Parses `--progress=plain` BuildKit output into stages.
///
/// `#N [stage] ...` opens a stage and binds step number `N` to it; later
/// `#N <secs> <text>` lines are its progress, `#N DONE` completes it and
/// `#N ERROR` fails it. A bare `ERROR` line fails the current stage and a
/// classic `Successfully built` line completes it.
pub fn parse_buildkit_progress(output: &str) -> BuildProgress {
    let mut stages: Vec<BuildStage> = Vec::new();
    let mut step_stage: Vec<(String, usize)> = Vec::new();
    let mut current: Option<usize> = None;

    let stage_of = |step_stage: &[(String, usize)], step: &str| {
        step_stage
            .iter()
            .rev()
            .find(|(number, _)| number == step)
            .map(|(_, index)| *index)
    };

    for line in output.lines().map(str::trim) {
        if let Some(caps) = STEP_HEADER.captures(line) {
            let name = caps[2].to_string();
            let index = match stages.iter().position(|stage| stage.name == name) {
                Some(index) => index,
                None => {
                    stages.push(BuildStage {
                        name,
                        status: StageStatus::InProgress,
                        steps: Vec::new(),
                        error: None,
                    });
                    stages.len() - 1
                }
            };
            step_stage.push((caps[1].to_string(), index));
            current = Some(index);
            continue;
        }
        if let Some(caps) = STEP_PROGRESS.captures(line) {
            if let Some(index) = stage_of(&step_stage, &caps[1]).or(current) {
                stages[index].steps.push(BuildStep {
                    progress: caps[2].parse().unwrap_or_default(),
                    message: caps[3].to_string(),
                });
            }
            continue;
        }
        if let Some(caps) = STEP_DONE.captures(line) {
            if let Some(index) = stage_of(&step_stage, &caps[1]) {
                if stages[index].status != StageStatus::Failed {
                    stages[index].status = StageStatus::Completed;
                }
            }
            continue;
        }
        let failed_at = match STEP_ERROR.captures(line) {
            Some(caps) => stage_of(&step_stage, &caps[1]),
            None if line.starts_with("ERROR") => current,
            None => None,
        };
        if let Some(index) = failed_at {
            stages[index].status = StageStatus::Failed;
            stages[index].error = Some(line.to_string());
            continue;
        }
        if line.starts_with("Successfully built") {
            if let Some(index) = current {
                stages[index].status = StageStatus::Completed;
            }
        }
    }

    BuildProgress {
        completed: !stages.is_empty()
            && stages.iter().all(|stage| stage.status == StageStatus::Completed),
        failed: stages.iter().any(|stage| stage.status == StageStatus::Failed),
        stages,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub term: String,
    pub filters: Vec<(String, String)>,
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `docker search` with one JSON object per result line.
    pub fn command(&self) -> String {
        let mut command = "docker search --format '{{json .}}'".to_string();
        for (key, value) in &self.filters {
            command.push_str(&format!(" --filter {}", shell_quote(&format!("{}={}", key, value))));
        }
        if let Some(limit) = self.limit {
            command.push_str(&format!(" --limit {}", limit));
        }
        command.push(' ');
        command.push_str(&shell_quote(&self.term));
        command
    }
}

/// Images whose listing carries a non-empty `Platform`.
pub fn multiplatform_only(images: Vec<Value>) -> Vec<Value> {
    images
        .into_iter()
        .filter(|image| match image.get("Platform") {
            Some(Value::String(platform)) => !platform.is_empty(),
            Some(Value::Null) | None => false,
            Some(Value::Object(platform)) => !platform.is_empty(),
            Some(_) => true,
        })
        .collect()
}

/// Build details from `docker image inspect` JSON (object or one-element
/// array): identity fields, BuildKit and build labels, and layer history.
pub fn build_info_from_inspect(inspect: &Value) -> Value {
    let image = match inspect {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    let field = |name: &str, fallback: Value| image.get(name).cloned().unwrap_or(fallback);

    let mut build = Map::new();
    if let Some(labels) = image
        .get("Config")
        .and_then(|config| config.get("Labels"))
        .and_then(Value::as_object)
    {
        let buildkit: Map<String, Value> = labels
            .iter()
            .filter(|(key, _)| key.starts_with("com.docker.buildkit"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !buildkit.is_empty() {
            build.insert("BuildKit".to_string(), Value::Object(buildkit));
        }
        let build_labels: Map<String, Value> = labels
            .iter()
            .filter(|(key, _)| key.to_lowercase().contains("build"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !build_labels.is_empty() {
            build.insert("Labels".to_string(), Value::Object(build_labels));
        }
    }
    if let Some(history) = image.get("History") {
        build.insert("History".to_string(), history.clone());
    }

    serde_json::json!({
        "Id": field("Id", Value::from("")),
        "Created": field("Created", Value::from("")),
        "Architecture": field("Architecture", Value::from("")),
        "Os": field("Os", Value::from("")),
        "Size": field("Size", Value::from(0)),
        "BuildInfo": build,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PLAIN_BUILD: &str = "#1 [internal] load build definition from Dockerfile
#1 transferring dockerfile: 150B done
#1 DONE 0.0s

#5 [2/3] RUN echo hello > /hello.txt
#5 0.212 hello
#5 DONE 0.3s

#6 [3/3] RUN apk add --no-cache curl
#6 1.004 fetch https://dl-cdn.alpinelinux.org/alpine/v3.20/main/x86_64/APKINDEX.tar.gz
#6 2.310 ERROR: unable to select packages:
#6 ERROR: process \"/bin/sh -c apk add --no-cache curl\" did not complete successfully: exit code: 1
";

    #[test]
    fn plain_progress_becomes_stages() {
        let progress = parse_buildkit_progress(PLAIN_BUILD);

        assert_eq!(progress.stages.len(), 3);
        assert_eq!(
            progress.stage("internal").map(|s| s.status),
            Some(StageStatus::Completed)
        );
        let run = progress.stage("2/3").expect("stage 2/3");
        assert_eq!(run.status, StageStatus::Completed);
        assert_eq!(run.steps, vec![BuildStep { progress: 0.212, message: "hello".into() }]);

        let apk = progress.stage("3/3").expect("stage 3/3");
        assert_eq!(apk.status, StageStatus::Failed);
        assert_eq!(apk.steps.len(), 2);
        assert!(apk.error.as_deref().unwrap_or_default().contains("exit code: 1"));
        assert!(progress.failed);
        assert!(!progress.completed);
    }

    #[test]
    fn no_stages_is_neither_completed_nor_failed() {
        let progress = parse_buildkit_progress("Sending build context to Docker daemon\n");
        assert!(progress.stages.is_empty());
        assert!(!progress.completed);
        assert!(!progress.failed);
    }

    #[test]
    fn build_command_quotes_every_value() {
        let command = BuildRequest::new("api149test:latest", "/tmp/sshpool build")
            .build_arg("VERSION", "latest")
            .platform("linux/amd64")
            .platform("linux/arm64")
            .command();
        assert_eq!(
            command,
            "docker buildx build --progress=plain --build-arg 'VERSION=latest' \
             --platform='linux/amd64,linux/arm64' -t 'api149test:latest' '/tmp/sshpool build'"
        );
    }

    #[test]
    fn search_command_has_filters_and_limit() {
        let command = SearchQuery::new("ubuntu")
            .filter("is-official", "true")
            .limit(5)
            .command();
        assert_eq!(
            command,
            "docker search --format '{{json .}}' --filter 'is-official=true' --limit 5 'ubuntu'"
        );
    }

    #[test]
    fn feature_map_follows_the_api_version() {
        let current = api_features("1.49");
        assert!(current.api_1_49_supported);
        assert_eq!(current.supported_features, 4);
        assert_eq!(current.total_features, 4);

        let older = api_features("v1.43");
        assert!(!older.api_1_49_supported);
        assert_eq!(older.supported_features, 0);
        assert!(older.features.iter().all(|feature| !feature.available));
    }

    #[test]
    fn only_images_with_a_platform_are_kept() {
        let images = vec![
            json!({"Repository": "ubuntu", "Platform": "linux/amd64"}),
            json!({"Repository": "alpine", "Platform": ""}),
            json!({"Repository": "busybox"}),
        ];
        let kept = multiplatform_only(images);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["Repository"], "ubuntu");
    }

    #[test]
    fn build_info_collects_labels_and_history() {
        let inspect = json!([{
            "Id": "sha256:ab12",
            "Created": "2025-05-01T10:00:00Z",
            "Architecture": "arm64",
            "Os": "linux",
            "Size": 7_800_000,
            "Config": {"Labels": {
                "com.docker.buildkit.version": "v0.20.0",
                "org.opencontainers.image.build-date": "2025-05-01",
                "maintainer": "ops"
            }},
            "History": [{"created_by": "RUN echo hello"}]
        }]);

        let info = build_info_from_inspect(&inspect);

        assert_eq!(info["Architecture"], "arm64");
        assert_eq!(info["Size"], 7_800_000);
        assert_eq!(info["BuildInfo"]["BuildKit"]["com.docker.buildkit.version"], "v0.20.0");
        assert_eq!(
            info["BuildInfo"]["Labels"]["org.opencontainers.image.build-date"],
            "2025-05-01"
        );
        assert!(info["BuildInfo"]["Labels"].get("maintainer").is_none());
        assert_eq!(info["BuildInfo"]["History"][0]["created_by"], "RUN echo hello");
    }

    #[test]
    fn build_info_without_labels_is_bare() {
        let info = build_info_from_inspect(&json!({"Id": "sha256:cd34", "Config": {"Labels": null}}));
        assert_eq!(info["Id"], "sha256:cd34");
        assert_eq!(info["Os"], "");
        assert_eq!(info["BuildInfo"], json!({}));
    }
}
