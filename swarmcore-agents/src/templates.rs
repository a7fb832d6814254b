//! # Direct-execution fast paths
//!
//! Heuristics and file-tree templates for the Coordinator's two
//! bypass-decomposition shortcuts: a single recognized file creation, and
//! a handful of built-in "complex project" scaffolds (Helm chart, Docker
//! compose). Both terminate with `final-response` exactly like normal
//! aggregation.

use std::path::PathBuf;

const CREATE_VERBS: &[&str] = &["create", "write", "make", "generate", "save"];
const FILE_EXTENSION_TOKENS: &[&str] = &[
    ".txt", ".md", ".py", ".rs", ".js", ".ts", ".json", ".yaml", ".yml", ".toml", ".html", ".css",
];
const COMPLEX_PROJECT_KEYWORDS: &[&str] = &["helm", "docker", "k8s", "kubernetes", "compose", "microservice"];

/// A single recognized file-name with optional literal content extracted
/// from a "simple file creation" task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleFileCreation {
    pub file_name: String,
    pub content: Option<String>,
}

/// Whether `task_text` matches the simple-file-creation heuristic: a
/// create-verb, a recognized file-extension token, and no
/// complex-project keyword.
pub fn detect_simple_file_creation(task_text: &str) -> Option<SimpleFileCreation> {
    let lower = task_text.to_lowercase();

    if COMPLEX_PROJECT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return None;
    }
    if !CREATE_VERBS.iter().any(|verb| lower.contains(verb)) {
        return None;
    }

    let file_name = task_text
        .split_whitespace()
        .find(|token| FILE_EXTENSION_TOKENS.iter().any(|ext| token.to_lowercase().ends_with(ext)))
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '_' && c != '-'))?
        .to_string();

    let content = extract_quoted_content(task_text);

    Some(SimpleFileCreation { file_name, content })
}

/// Pull the first single- or double-quoted literal out of the task text,
/// used as the file's content when the task spells it out
/// ("...with content 'Hello World!'").
fn extract_quoted_content(task_text: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        if let Some(start) = task_text.find(quote) {
            if let Some(end_rel) = task_text[start + 1..].find(quote) {
                let end = start + 1 + end_rel;
                return Some(task_text[start + 1..end].to_string());
            }
        }
    }
    None
}

/// Which complex-project keyword `task_text` matched, if any.
pub fn detect_complex_project(task_text: &str) -> Option<ComplexProjectKind> {
    let lower = task_text.to_lowercase();
    if lower.contains("helm") {
        Some(ComplexProjectKind::HelmChart)
    } else if lower.contains("compose") || (lower.contains("docker") && !lower.contains("helm")) {
        Some(ComplexProjectKind::DockerCompose)
    } else if lower.contains("k8s") || lower.contains("kubernetes") {
        Some(ComplexProjectKind::HelmChart)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexProjectKind {
    HelmChart,
    DockerCompose,
}

/// One file in a generated project scaffold: path relative to the
/// project folder, and its literal contents.
#[derive(Debug, Clone)]
pub struct ScaffoldFile {
    pub relative_path: PathBuf,
    pub content: String,
}

impl ComplexProjectKind {
    /// Deterministic file tree for this scaffold kind, matching the
    /// original framework's built-in project templates.
    pub fn scaffold(&self, project_name: &str) -> Vec<ScaffoldFile> {
        match self {
            ComplexProjectKind::HelmChart => helm_chart_scaffold(project_name),
            ComplexProjectKind::DockerCompose => docker_compose_scaffold(project_name),
        }
    }
}

fn helm_chart_scaffold(project_name: &str) -> Vec<ScaffoldFile> {
    vec![
        ScaffoldFile {
            relative_path: PathBuf::from("Chart.yaml"),
            content: format!(
                "apiVersion: v2\nname: {project_name}\ndescription: A Helm chart generated by swarmcore\nversion: 0.1.0\n"
            ),
        },
        ScaffoldFile {
            relative_path: PathBuf::from("values.yaml"),
            content: "replicaCount: 1\nimage:\n  repository: placeholder\n  tag: latest\n".to_string(),
        },
        ScaffoldFile {
            relative_path: PathBuf::from("templates/deployment.yaml"),
            content: format!(
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {project_name}\nspec:\n  replicas: {{{{ .Values.replicaCount }}}}\n"
            ),
        },
        ScaffoldFile {
            relative_path: PathBuf::from("templates/service.yaml"),
            content: format!(
                "apiVersion: v1\nkind: Service\nmetadata:\n  name: {project_name}\nspec:\n  selector:\n    app: {project_name}\n"
            ),
        },
    ]
}

fn docker_compose_scaffold(project_name: &str) -> Vec<ScaffoldFile> {
    vec![
        ScaffoldFile {
            relative_path: PathBuf::from("docker-compose.yml"),
            content: format!(
                "version: \"3.9\"\nservices:\n  {project_name}:\n    build: .\n    ports:\n      - \"8080:8080\"\n"
            ),
        },
        ScaffoldFile {
            relative_path: PathBuf::from("Dockerfile"),
            content: "FROM debian:stable-slim\nWORKDIR /app\nCOPY . .\nCMD [\"true\"]\n".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_simple_file_creation_with_literal_content() {
        let result = detect_simple_file_creation("create a file named hello.txt with content 'Hello World!'");
        let result = result.unwrap();
        assert_eq!(result.file_name, "hello.txt");
        assert_eq!(result.content.as_deref(), Some("Hello World!"));
    }

    #[test]
    fn complex_project_keyword_suppresses_simple_file_path() {
        assert!(detect_simple_file_creation("create a helm chart with values.yaml").is_none());
    }

    #[test]
    fn build_a_web_scraper_is_neither_fast_path() {
        assert!(detect_simple_file_creation("Build a web scraper").is_none());
        assert!(detect_complex_project("Build a web scraper").is_none());
    }

    #[test]
    fn detects_helm_and_docker_compose() {
        assert_eq!(detect_complex_project("set up a helm chart for this service"), Some(ComplexProjectKind::HelmChart));
        assert_eq!(
            detect_complex_project("write a docker compose file"),
            Some(ComplexProjectKind::DockerCompose)
        );
    }

    #[test]
    fn helm_scaffold_has_expected_files() {
        let files = ComplexProjectKind::HelmChart.scaffold("myapp");
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.to_string_lossy().to_string()).collect();
        assert!(paths.contains(&"Chart.yaml".to_string()));
        assert!(paths.contains(&"templates/deployment.yaml".to_string()));
    }
}
