//! Declarative TOML scenarios.
//!
//! A scenario file describes one run: skip conditions, reserved ports, the
//! proxy fixture, auxiliary processes and ordered steps. Strings may use the
//! placeholders of [`TemplateContext`]; relative paths resolve against the
//! directory holding the scenario file.
//!
//! ```toml
//! name = "chunked_encoding_h2"
//! continue_on_fail = true
//! ports = ["delay-server"]
//!
//! [[skip_unless]]
//! has_program = { program = "nghttp" }
//!
//! [[process]]
//! name = "delay-server"
//! command = "sh {dir:test}/delay-server.sh {port:delay-server}"
//! ready = { port_open = "delay-server" }
//!
//! [[step]]
//! name = "h2 get"
//! start_before = ["delay-server"]
//! command = "curl -s http://127.0.0.1:{port:delay-server}/"
//! return_code = 0
//!
//! [[step.expect]]
//! contains = "HTTP/1.1 200"
//! rationale = "origin answers"
//! ```

use crate::assertion::Expectation;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::golden::{GoldenReference, LineFilter};
use crate::process::{ProcessSpec, DEFAULT_PROCESS};
use crate::proxy::{ProxyFixture, RecordValue};
use crate::readiness::Readiness;
use crate::skip::{Requirements, SkipCondition, SkipDecision};
use crate::step::{Step, Target};
use crate::template::TemplateContext;
use crate::test_run::TestRun;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parsed scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Run name.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub summary: Option<String>,
    /// Record failing steps and keep going.
    #[serde(default)]
    pub continue_on_fail: bool,
    /// Port names to reserve before anything else.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Run-wide environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Skip unless all of these hold.
    #[serde(default)]
    pub skip_unless: Vec<SkipCondition>,
    /// Skip if any of these holds.
    #[serde(default)]
    pub skip_if: Vec<SkipCondition>,
    /// Reverse proxy under test.
    #[serde(default)]
    pub proxy: Option<ProxyDef>,
    /// Auxiliary processes.
    #[serde(default, rename = "process")]
    pub processes: Vec<ProcessDef>,
    /// Ordered steps.
    #[serde(default, rename = "step")]
    pub steps: Vec<StepDef>,

    #[serde(skip)]
    test_dir: PathBuf,
}

/// `[proxy]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyDef {
    /// Process name; also the name of its HTTP port.
    #[serde(default = "default_proxy_name")]
    pub name: String,
    /// Proxy executable.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Reserve and configure a TLS port.
    #[serde(default)]
    pub enable_tls: bool,
    /// HTTP cache.
    #[serde(default = "default_true")]
    pub enable_cache: bool,
    /// Directory holding `server.pem` and `server.key`.
    #[serde(default)]
    pub ssl_files_dir: Option<String>,
    /// Typed records.
    #[serde(default)]
    pub records: BTreeMap<String, RecordValue>,
    /// Remap rules.
    #[serde(default)]
    pub remap: Vec<RemapDef>,
    /// `ssl_multicert.config` lines.
    #[serde(default)]
    pub ssl_multicert: Vec<String>,
    /// `plugin.config` lines.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Readiness timeout override.
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,
}

/// `[[proxy.remap]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemapDef {
    /// Source path or URL.
    pub from: String,
    /// Destination URL.
    pub to: String,
}

/// Readiness as written in scenario files.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadyDef {
    /// Ready once spawned.
    #[default]
    Immediate,
    /// Named reserved port accepts connections.
    PortOpen(String),
    /// Output contains text.
    OutputContains(String),
    /// Path exists.
    FileExists(String),
    /// Fixed delay.
    DelayMs(u64),
}

/// `[[process]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDef {
    /// Unique name.
    pub name: String,
    /// Shell command line, run through `sh -c`.
    #[serde(default)]
    pub command: Option<String>,
    /// Executable, as an alternative to `command`.
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments for `program`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Readiness predicate.
    #[serde(default)]
    pub ready: ReadyDef,
    /// Readiness timeout override.
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,
    /// Declared exit code.
    #[serde(default)]
    pub return_code: Option<i32>,
    /// Processes to start first.
    #[serde(default)]
    pub start_before: Vec<String>,
}

/// `[[step]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDef {
    /// Display name.
    pub name: String,
    /// Processes to have running.
    #[serde(default)]
    pub start_before: Vec<String>,
    /// Primary shell command.
    #[serde(default)]
    pub command: Option<String>,
    /// Name the primary command is registered under.
    #[serde(default)]
    pub command_name: Option<String>,
    /// Declared exit code of the primary command.
    #[serde(default)]
    pub return_code: Option<i32>,
    /// Keep the command alive after the step.
    #[serde(default)]
    pub keep_running: bool,
    /// Step timeout override.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Processes that must be alive when the step ends.
    #[serde(default)]
    pub still_running_after: Vec<String>,
    /// Predicates.
    #[serde(default)]
    pub expect: Vec<ExpectDef>,
    /// Golden comparisons.
    #[serde(default)]
    pub golden: Vec<GoldenDef>,
}

/// `[[step.expect]]` entry. Exactly one predicate key must be set.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExpectDef {
    /// Evaluate against this process's output instead of the command's.
    #[serde(default)]
    pub process: Option<String>,
    /// Evaluate against this file.
    #[serde(default)]
    pub file: Option<String>,
    /// Literal that must appear.
    #[serde(default)]
    pub contains: Option<String>,
    /// Literal that must not appear.
    #[serde(default)]
    pub excludes: Option<String>,
    /// Regex that must match.
    #[serde(default)]
    pub contains_regex: Option<String>,
    /// Regex that must not match.
    #[serde(default)]
    pub excludes_regex: Option<String>,
    /// Literal that must appear exactly `times` times.
    #[serde(default)]
    pub occurs: Option<String>,
    /// Count for `occurs`.
    #[serde(default)]
    pub times: Option<usize>,
    /// Shown when the predicate fails.
    #[serde(default)]
    pub rationale: String,
}

/// `[[step.golden]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoldenDef {
    /// Compare this process's output.
    #[serde(default)]
    pub process: Option<String>,
    /// Compare this file.
    #[serde(default)]
    pub file: Option<String>,
    /// Reference file.
    pub reference: String,
    /// Drop lines containing any of these before comparing.
    #[serde(default)]
    pub drop_lines: Vec<String>,
    /// Drop lines matching any of these regexes before comparing.
    #[serde(default)]
    pub drop_matching: Vec<String>,
    /// Shown when the comparison fails.
    #[serde(default)]
    pub rationale: String,
}

fn default_proxy_name() -> String {
    "ts".to_string()
}

fn default_true() -> bool {
    true
}

impl Scenario {
    /// Reads a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let test_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::from_toml(&content, test_dir)
    }

    /// Parses scenario text; `test_dir` anchors relative paths.
    ///
    /// A relative `test_dir` is resolved against the current directory, since
    /// processes run with the run directory as their working directory.
    pub fn from_toml(content: &str, test_dir: impl AsRef<Path>) -> Result<Self> {
        let mut scenario: Self = toml::from_str(content)
            .map_err(|e| HarnessError::ConfigError(format!("failed to parse scenario: {}", e)))?;
        let test_dir = test_dir.as_ref();
        scenario.test_dir = if test_dir.is_absolute() {
            test_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(test_dir)
        };
        Ok(scenario)
    }

    /// Directory holding the scenario's fixtures.
    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// Skip conditions of this scenario.
    pub fn requirements(&self) -> Requirements {
        let requirements = self
            .skip_unless
            .iter()
            .cloned()
            .fold(Requirements::new(), Requirements::skip_unless);
        self.skip_if
            .iter()
            .cloned()
            .fold(requirements, Requirements::skip_if)
    }

    /// Probes the host once.
    pub fn skip_decision(&self) -> SkipDecision {
        self.requirements().evaluate()
    }

    /// Compiles the scenario into a run.
    ///
    /// # Errors
    ///
    /// Template, pattern, allocation and definition errors.
    pub fn build(&self, config: HarnessConfig) -> Result<TestRun> {
        let mut run = TestRun::new(&self.name, config, &self.test_dir)?;
        run.continue_on_fail(self.continue_on_fail);

        for name in &self.ports {
            run.reserve_port(name)?;
        }
        // Reserve proxy ports up front so every template can see them.
        if let Some(proxy) = &self.proxy {
            run.reserve_port(&proxy.name)?;
            if proxy.enable_tls {
                run.reserve_port(&format!("{}{}", proxy.name, crate::proxy::SSL_PORT_SUFFIX))?;
            }
        }

        let ports = run.ports().clone();
        let dirs = run.dirs().clone();
        let ctx = TemplateContext::new(&ports, &dirs);

        for (key, value) in &self.env {
            run.env(key, ctx.render(value)?);
        }

        if let Some(proxy) = &self.proxy {
            let mut fixture = ProxyFixture::new(&proxy.name, &ctx.render(&proxy.program)?)
                .enable_tls(proxy.enable_tls)
                .enable_cache(proxy.enable_cache);
            for arg in ctx.render_all(&proxy.args)? {
                fixture = fixture.arg(arg);
            }
            for (name, value) in &proxy.records {
                let value = match value {
                    RecordValue::String(s) => RecordValue::String(ctx.render(s)?),
                    other => other.clone(),
                };
                fixture = fixture.record(name, value);
            }
            for rule in &proxy.remap {
                fixture = fixture.remap(&ctx.render(&rule.from)?, &ctx.render(&rule.to)?);
            }
            for line in &proxy.ssl_multicert {
                fixture = fixture.ssl_multicert(&ctx.render(line)?);
            }
            for line in &proxy.plugins {
                fixture = fixture.plugin(&ctx.render(line)?);
            }
            if let Some(dir) = &proxy.ssl_files_dir {
                fixture = fixture.default_ssl_files(self.resolve(&ctx.render(dir)?));
            }

            if let Some(ms) = proxy.ready_timeout_ms {
                fixture = fixture.ready_within(Duration::from_millis(ms));
            }
            fixture.install(&mut run)?;
        }

        for def in &self.processes {
            run.process(self.compile_process(def, &ctx)?)?;
        }
        for def in &self.steps {
            run.step(self.compile_step(def, &ctx)?);
        }

        run.validate()?;
        Ok(run)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_relative() {
            self.test_dir.join(path)
        } else {
            path
        }
    }

    fn compile_process(&self, def: &ProcessDef, ctx: &TemplateContext<'_>) -> Result<ProcessSpec> {
        let mut spec = match (&def.command, &def.program) {
            (Some(command), None) => ProcessSpec::shell(&def.name, &ctx.render(command)?),
            (None, Some(program)) => {
                ProcessSpec::new(&def.name, &ctx.render(program)?).args(ctx.render_all(&def.args)?)
            }
            _ => {
                return Err(HarnessError::ConfigError(format!(
                    "process '{}' needs exactly one of `command` or `program`",
                    def.name
                )))
            }
        };

        for (key, value) in &def.env {
            spec = spec.env(key, ctx.render(value)?);
        }
        if let Some(cwd) = &def.cwd {
            spec = spec.cwd(self.resolve(&ctx.render(cwd)?));
        }
        spec = spec.ready(self.compile_ready(&def.ready, ctx)?);
        if let Some(ms) = def.ready_timeout_ms {
            spec = spec.ready_within(Duration::from_millis(ms));
        }
        if let Some(code) = def.return_code {
            spec = spec.return_code(code);
        }
        for dep in &def.start_before {
            spec = spec.start_before(dep);
        }
        Ok(spec)
    }

    fn compile_ready(&self, def: &ReadyDef, ctx: &TemplateContext<'_>) -> Result<Readiness> {
        Ok(match def {
            ReadyDef::Immediate => Readiness::Immediate,
            ReadyDef::PortOpen(name) => {
                let port = ctx.render(&format!("{{port:{}}}", name))?;
                let port = port.parse::<u16>().map_err(|e| {
                    HarnessError::ConfigError(format!("bad port for '{}': {}", name, e))
                })?;
                Readiness::port(port)
            }
            ReadyDef::OutputContains(text) => Readiness::OutputContains(ctx.render(text)?),
            ReadyDef::FileExists(path) => Readiness::FileExists(self.resolve(&ctx.render(path)?)),
            ReadyDef::DelayMs(ms) => Readiness::Delay(Duration::from_millis(*ms)),
        })
    }

    fn compile_step(&self, def: &StepDef, ctx: &TemplateContext<'_>) -> Result<Step> {
        let mut step = Step::new(&def.name);
        for name in &def.start_before {
            step = step.start_before(name);
        }
        if let Some(command) = &def.command {
            let name = def.command_name.as_deref().unwrap_or(DEFAULT_PROCESS);
            step = step.command(ProcessSpec::shell(name, &ctx.render(command)?));
        }
        if let Some(code) = def.return_code {
            step = step.return_code(code);
        }
        if def.keep_running {
            step = step.keep_running();
        }
        if let Some(ms) = def.timeout_ms {
            step = step.timeout(Duration::from_millis(ms));
        }
        for name in &def.still_running_after {
            step = step.still_running_after(name);
        }
        for expect in &def.expect {
            let target = self.compile_target(expect.process.as_ref(), expect.file.as_ref(), ctx)?;
            step = step.expect(target, compile_expectation(expect, ctx)?);
        }
        for golden in &def.golden {
            let target = self.compile_target(golden.process.as_ref(), golden.file.as_ref(), ctx)?;
            let mut reference =
                GoldenReference::new(self.resolve(&ctx.render(&golden.reference)?), &golden.rationale);
            for text in &golden.drop_lines {
                reference = reference.filter(LineFilter::Containing(ctx.render(text)?));
            }
            for pattern in &golden.drop_matching {
                reference = reference.filter(LineFilter::matching(pattern)?);
            }
            step = step.golden(target, reference);
        }
        Ok(step)
    }

    fn compile_target(
        &self,
        process: Option<&String>,
        file: Option<&String>,
        ctx: &TemplateContext<'_>,
    ) -> Result<Target> {
        match (process, file) {
            (None, None) => Ok(Target::Default),
            (Some(name), None) => Ok(Target::Process(name.clone())),
            (None, Some(path)) => Ok(Target::File(PathBuf::from(ctx.render(path)?))),
            (Some(_), Some(_)) => Err(HarnessError::ConfigError(
                "a check targets either `process` or `file`, not both".into(),
            )),
        }
    }
}

fn compile_expectation(def: &ExpectDef, ctx: &TemplateContext<'_>) -> Result<Expectation> {
    let rationale = def.rationale.as_str();
    let mut found = Vec::new();
    if let Some(text) = &def.contains {
        found.push(Expectation::contains(&ctx.render(text)?, rationale));
    }
    if let Some(text) = &def.excludes {
        found.push(Expectation::excludes(&ctx.render(text)?, rationale));
    }
    if let Some(pattern) = &def.contains_regex {
        found.push(Expectation::contains_expr(pattern, rationale)?);
    }
    if let Some(pattern) = &def.excludes_regex {
        found.push(Expectation::excludes_expr(pattern, rationale)?);
    }
    if let Some(text) = &def.occurs {
        let times = def.times.ok_or_else(|| {
            HarnessError::ConfigError(format!("`occurs = {:?}` needs `times`", text))
        })?;
        found.push(Expectation::occurs(&ctx.render(text)?, times, rationale));
    }

    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(HarnessError::ConfigError(
            "expectation needs one of contains, excludes, contains_regex, excludes_regex, occurs"
                .into(),
        )),
        _ => Err(HarnessError::ConfigError(
            "expectation sets more than one predicate; split it into several [[step.expect]]"
                .into(),
        )),
    }
}
