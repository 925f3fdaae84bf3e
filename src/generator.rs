//! Content generation.
//!
//! [`CodeModel`] is the seam to the text-generation collaborator: one
//! planning call per job, one generation call per module, and a repair call
//! that asks the model to fix its own malformed output. The
//! [`ModuleBuilder`] adapter drives it and absorbs the no-guarantee contract:
//! a parse failure earns exactly one repair attempt, and a module whose
//! output is still unusable contributes zero files without failing the job.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{BuildModule, FileTask, GeneratedFile, Plan, ProjectBrief};
use crate::plan::extract_json;

/// How module content is generated: one batched call per module, or one
/// call per file task with a concurrent join.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    Sequential,
    Fanout,
}

/// The text-generation collaborator. Implementations make no structural
/// guarantees about their output; the adapter and the plan validator absorb
/// that risk.
#[async_trait]
pub trait CodeModel: Send + Sync {
    /// Produce raw text expected to decode into a [`Plan`].
    async fn plan_project(&self, brief: &ProjectBrief) -> Result<String>;

    /// Produce raw text expected to decode into a list of `{path, content}`
    /// pairs covering the given tasks.
    async fn generate_module(
        &self,
        tasks: &[FileTask],
        brief: &ProjectBrief,
        plan: &Plan,
    ) -> Result<String>;

    /// Ask the model to fix its own malformed output. Called at most once
    /// per generation attempt.
    async fn repair_output(&self, malformed: &str) -> Result<String>;
}

/// Outcome of one module build. `failed` means the module produced no
/// usable output after the repair attempt; the pipeline treats that as
/// non-fatal and moves on.
#[derive(Debug, Clone)]
pub struct ModuleBuild {
    pub files: Vec<GeneratedFile>,
    pub failed: bool,
}

/// Parse raw generator output into files. Accepts either a bare
/// `[{path, content}, ...]` array or an object wrapping it under `files`.
/// Entries without a non-empty path and string content are skipped
/// individually; duplicate paths keep the first occurrence.
pub fn parse_generated_files(raw: &str) -> Result<Vec<GeneratedFile>> {
    let snippet = extract_json(raw)
        .context("generator output contains no JSON object or array")?;
    let value: Value =
        serde_json::from_str(snippet).context("generator output is not valid JSON")?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("files") {
            Some(Value::Array(items)) => items,
            _ => anyhow::bail!("generator output has no 'files' array"),
        },
        _ => anyhow::bail!("generator output is neither a list nor a files object"),
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let Some(path) = obj.get("path").and_then(Value::as_str) else {
            continue;
        };
        let Some(content) = obj.get("content").and_then(Value::as_str) else {
            continue;
        };
        if path.trim().is_empty() || !seen.insert(path.to_string()) {
            continue;
        }
        files.push(GeneratedFile {
            path: path.to_string(),
            content: content.to_string(),
        });
    }
    Ok(files)
}

/// Drives the code model per module with the bounded self-repair policy.
#[derive(Clone)]
pub struct ModuleBuilder {
    model: Arc<dyn CodeModel>,
}

impl ModuleBuilder {
    pub fn new(model: Arc<dyn CodeModel>) -> Self {
        Self { model }
    }

    /// One batched generation call for the whole module.
    pub async fn build_module(
        &self,
        module: &BuildModule,
        brief: &ProjectBrief,
        plan: &Plan,
    ) -> ModuleBuild {
        match self.generate_once(&module.tasks, brief, plan).await {
            Ok(files) => ModuleBuild {
                files,
                failed: false,
            },
            Err(e) => {
                warn!(
                    "[generator] module {} produced no usable output: {:#}",
                    module.kind.as_str(),
                    e
                );
                ModuleBuild {
                    files: vec![],
                    failed: true,
                }
            }
        }
    }

    /// Per-file fan-out: every task becomes its own generation call, all
    /// launched together and joined. Settled successes are accumulated
    /// keyed by path; per-task failures only cost their own file.
    pub async fn build_fanout(
        &self,
        module: &BuildModule,
        brief: &ProjectBrief,
        plan: &Plan,
    ) -> ModuleBuild {
        let calls = module.tasks.iter().map(|task| {
            let tasks = std::slice::from_ref(task);
            self.generate_once(tasks, brief, plan)
        });
        let results = futures::future::join_all(calls).await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut files = Vec::new();
        let mut failed_tasks = 0usize;
        for (task, result) in module.tasks.iter().zip(results) {
            match result {
                Ok(task_files) => {
                    for f in task_files {
                        if seen.insert(f.path.clone()) {
                            files.push(f);
                        }
                    }
                }
                Err(e) => {
                    failed_tasks += 1;
                    warn!(
                        "[generator] task {} produced no usable output: {:#}",
                        task.path, e
                    );
                }
            }
        }
        ModuleBuild {
            failed: files.is_empty() && failed_tasks > 0,
            files,
        }
    }

    /// One generation attempt: call the model, parse, and on parse failure
    /// issue exactly one repair request before parsing again.
    async fn generate_once(
        &self,
        tasks: &[FileTask],
        brief: &ProjectBrief,
        plan: &Plan,
    ) -> Result<Vec<GeneratedFile>> {
        let raw = self
            .model
            .generate_module(tasks, brief, plan)
            .await
            .context("generator call failed")?;

        match parse_generated_files(&raw) {
            Ok(files) => Ok(files),
            Err(parse_err) => {
                debug!("[generator] first parse failed, requesting repair: {:#}", parse_err);
                let repaired = self
                    .model
                    .repair_output(&raw)
                    .await
                    .context("repair call failed")?;
                parse_generated_files(&repaired).context("repaired output still unusable")
            }
        }
    }
}

// ── Shell-out model ──────────────────────────────────────────────────

/// A [`CodeModel`] that shells out to a configurable command, writing the
/// prompt as the final argument and reading raw text from stdout. This is
/// the indirection the worker binary ships with; hosted-API models plug in
/// behind the same trait.
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run model command '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("model command exited with failure: {}", stderr);
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl CodeModel for CommandModel {
    async fn plan_project(&self, brief: &ProjectBrief) -> Result<String> {
        let prompt = format!(
            "You are a lead software architect designing a high-level scaffold.\n\
             Produce a single raw JSON object with three keys: \"database_schema\" (array), \
             \"api_contract\" (array), and \"file_structure\" (flat array of objects, each \
             with \"path\" and \"dependencies\").\n\n\
             Application name: {}\n\
             Core request: {}\n\
             Technologies: {}\n\
             Pack type: {}\n\n\
             Output ONLY the raw JSON object.",
            brief.title, brief.description, brief.tech_used, brief.pack_type
        );
        self.invoke(&prompt).await
    }

    async fn generate_module(
        &self,
        tasks: &[FileTask],
        brief: &ProjectBrief,
        plan: &Plan,
    ) -> Result<String> {
        let paths: Vec<&str> = tasks.iter().map(|t| t.path.as_str()).collect();
        let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
        let prompt = format!(
            "You are an expert full-stack developer. Write the complete source code for the \
             files listed below, which form one module of a larger application.\n\n\
             Project: {} — {}\n\n\
             Architecture plan (source of truth):\n{}\n\n\
             Files to generate: {}\n\n\
             Respond with a single raw JSON object with one key, \"files\": an array of \
             objects each holding \"path\" and \"content\".",
            brief.title,
            brief.description,
            plan_json,
            serde_json::to_string(&paths).unwrap_or_default()
        );
        self.invoke(&prompt).await
    }

    async fn repair_output(&self, malformed: &str) -> Result<String> {
        let prompt = format!(
            "The following text was supposed to be a single valid JSON object with a \
             \"files\" array of {{\"path\", \"content\"}} objects, but it is malformed. \
             Return ONLY the corrected raw JSON, nothing else.\n\n---\n{}\n---",
            malformed
        );
        self.invoke(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn brief() -> ProjectBrief {
        ProjectBrief {
            id: 1,
            title: "Recipe Box".to_string(),
            description: "A recipe sharing app".to_string(),
            tech_used: "node, react".to_string(),
            pack_type: "web".to_string(),
        }
    }

    fn plan_of(paths: &[&str]) -> Plan {
        Plan {
            file_structure: paths.iter().map(|p| FileTask::new(*p)).collect(),
            api_contract: None,
            database_schema: None,
        }
    }

    fn module_of(paths: &[&str]) -> BuildModule {
        BuildModule {
            kind: ModuleKind::Backend,
            tasks: paths.iter().map(|p| FileTask::new(*p)).collect(),
        }
    }

    /// Replays scripted module responses in order and counts calls.
    #[derive(Default)]
    struct ScriptedModel {
        module_responses: Mutex<VecDeque<String>>,
        repair_responses: Mutex<VecDeque<String>>,
        module_calls: AtomicUsize,
        repair_calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn with_modules(responses: &[&str]) -> Self {
            Self {
                module_responses: Mutex::new(
                    responses.iter().map(|s| s.to_string()).collect(),
                ),
                ..Default::default()
            }
        }

        fn with_repair(mut self, responses: &[&str]) -> Self {
            self.repair_responses =
                Mutex::new(responses.iter().map(|s| s.to_string()).collect());
            self
        }
    }

    #[async_trait]
    impl CodeModel for ScriptedModel {
        async fn plan_project(&self, _brief: &ProjectBrief) -> Result<String> {
            anyhow::bail!("not scripted")
        }

        async fn generate_module(
            &self,
            _tasks: &[FileTask],
            _brief: &ProjectBrief,
            _plan: &Plan,
        ) -> Result<String> {
            self.module_calls.fetch_add(1, Ordering::SeqCst);
            self.module_responses
                .lock()
                .unwrap()
                .pop_front()
                .context("no scripted module response left")
        }

        async fn repair_output(&self, _malformed: &str) -> Result<String> {
            self.repair_calls.fetch_add(1, Ordering::SeqCst);
            self.repair_responses
                .lock()
                .unwrap()
                .pop_front()
                .context("no scripted repair response left")
        }
    }

    /// Deterministic model: one comment-stub file per requested task.
    struct EchoModel;

    #[async_trait]
    impl CodeModel for EchoModel {
        async fn plan_project(&self, _brief: &ProjectBrief) -> Result<String> {
            anyhow::bail!("not used")
        }

        async fn generate_module(
            &self,
            tasks: &[FileTask],
            _brief: &ProjectBrief,
            _plan: &Plan,
        ) -> Result<String> {
            let files: Vec<serde_json::Value> = tasks
                .iter()
                .map(|t| serde_json::json!({"path": t.path, "content": format!("// {}", t.path)}))
                .collect();
            Ok(serde_json::json!({ "files": files }).to_string())
        }

        async fn repair_output(&self, _malformed: &str) -> Result<String> {
            anyhow::bail!("not used")
        }
    }

    // ── parse_generated_files ────────────────────────────────────────

    #[test]
    fn test_parse_bare_list() {
        let raw = r#"[{"path": "a.js", "content": "x"}, {"path": "b.js", "content": "y"}]"#;
        let files = parse_generated_files(raw).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.js");
    }

    #[test]
    fn test_parse_wrapped_files_object() {
        let raw = r#"Here you go:
```json
{"files": [{"path": "server.js", "content": "const x = 1;"}]}
```"#;
        let files = parse_generated_files(raw).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "const x = 1;");
    }

    #[test]
    fn test_parse_skips_incomplete_entries() {
        let raw = r#"{"files": [
            {"path": "good.js", "content": "ok"},
            {"path": "", "content": "empty path"},
            {"path": "no-content.js"},
            {"content": "no path"},
            42
        ]}"#;
        let files = parse_generated_files(raw).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "good.js");
    }

    #[test]
    fn test_parse_dedupes_keeping_first() {
        let raw = r#"[{"path": "a.js", "content": "first"}, {"path": "a.js", "content": "second"}]"#;
        let files = parse_generated_files(raw).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "first");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_generated_files("I couldn't generate anything.").is_err());
    }

    #[test]
    fn test_parse_rejects_object_without_files_key() {
        assert!(parse_generated_files(r#"{"result": []}"#).is_err());
    }

    // ── repair policy ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_repair_path_exercised_exactly_once() {
        let model = ScriptedModel::with_modules(&["this is not json at all"])
            .with_repair(&[r#"{"files": [{"path": "fixed.js", "content": "ok"}]}"#]);
        let model = Arc::new(model);
        let builder = ModuleBuilder::new(model.clone());

        let build = builder
            .build_module(&module_of(&["fixed.js"]), &brief(), &plan_of(&["fixed.js"]))
            .await;

        assert!(!build.failed);
        assert_eq!(build.files.len(), 1);
        assert_eq!(model.module_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.repair_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_parse_failure_is_non_fatal_and_not_looped() {
        let model =
            ScriptedModel::with_modules(&["garbage"]).with_repair(&["still garbage"]);
        let model = Arc::new(model);
        let builder = ModuleBuilder::new(model.clone());

        let build = builder
            .build_module(&module_of(&["x.js"]), &brief(), &plan_of(&["x.js"]))
            .await;

        assert!(build.failed);
        assert!(build.files.is_empty());
        assert_eq!(model.repair_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_valid_first_response_skips_repair() {
        let model = ScriptedModel::with_modules(&[
            r#"[{"path": "a.js", "content": "x"}]"#,
        ]);
        let model = Arc::new(model);
        let builder = ModuleBuilder::new(model.clone());

        let build = builder
            .build_module(&module_of(&["a.js"]), &brief(), &plan_of(&["a.js"]))
            .await;

        assert!(!build.failed);
        assert_eq!(model.repair_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generator_transport_failure_is_non_fatal() {
        // Empty script: the model call itself errors.
        let model = Arc::new(ScriptedModel::default());
        let builder = ModuleBuilder::new(model);

        let build = builder
            .build_module(&module_of(&["a.js"]), &brief(), &plan_of(&["a.js"]))
            .await;
        assert!(build.failed);
        assert!(build.files.is_empty());
    }

    // ── fan-out ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_fanout_matches_sequential_for_deterministic_model() {
        let paths = ["backend/server.js", "backend/db.js", "backend/auth.js"];
        let module = module_of(&paths);
        let plan = plan_of(&paths);
        let builder = ModuleBuilder::new(Arc::new(EchoModel));

        let sequential = builder.build_module(&module, &brief(), &plan).await;
        let fanout = builder.build_fanout(&module, &brief(), &plan).await;

        assert!(!sequential.failed);
        assert!(!fanout.failed);
        let mut seq: Vec<_> = sequential.files.clone();
        let mut fan: Vec<_> = fanout.files.clone();
        seq.sort_by(|a, b| a.path.cmp(&b.path));
        fan.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(seq, fan);
    }

    #[tokio::test]
    async fn test_fanout_partial_failure_keeps_settled_files() {
        // Two tasks, but only one scripted response: the second call fails.
        let model = ScriptedModel::with_modules(&[
            r#"[{"path": "a.js", "content": "x"}]"#,
        ]);
        let builder = ModuleBuilder::new(Arc::new(model));

        let build = builder
            .build_fanout(&module_of(&["a.js", "b.js"]), &brief(), &plan_of(&["a.js", "b.js"]))
            .await;

        assert!(!build.failed);
        assert_eq!(build.files.len(), 1);
        assert_eq!(build.files[0].path, "a.js");
    }
}
