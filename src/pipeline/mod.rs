//! Contains the fill pipeline.

use crate::{
    builder::{BuildOptions, FixtureBuilder},
    cli::FillConfig,
    collector::FixtureCollector,
    error::FillError,
    fixture::FixtureRecord,
    forks::{Fork, ForkChain, ForkRules},
    scenario::ScenarioFile,
    t8n::TransitionTool,
};
use cli_table::{Cell, Style, Table};
use color_eyre::{
    eyre::{ensure, eyre},
    owo_colors::OwoColorize,
    Result,
};
use indicatif::{HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use itertools::Itertools;
use runnable::FillCase;
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{self, Duration},
};
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinSet,
};
use tracing::{info, warn};

mod runnable;

/// The [FillPipeline] is a pipelined fixture filler, with [Self::setup], [Self::run], and
/// [Self::teardown] stages.
pub(crate) struct FillPipeline<'a> {
    /// The fill configuration.
    cfg: &'a FillConfig,
    /// The fork chain, shared read-only by every instance.
    chain: Arc<ForkChain>,
    /// The transition tool every instance is filled with.
    tool: Arc<dyn TransitionTool + Send + Sync>,
    /// The builder, available once the tool has reported its version.
    builder: Option<FixtureBuilder>,
    /// The tool's version string.
    tool_version: String,
    /// The forks targeted by this run.
    targets: Vec<Fork>,
    /// The instances to fill.
    cases: Option<Vec<FillCase>>,
    /// The result of each instance, in submission order.
    outcomes: Option<Vec<Result<FixtureRecord, FillError>>>,
}

/// The record of a fill run, written next to the fixtures.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RunManifest {
    filling_transition_tool: String,
    forks: Vec<String>,
    filled: usize,
    failed: usize,
    fixture_files: Vec<PathBuf>,
    failures: Vec<ManifestFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ManifestFailure {
    module: String,
    fixture: String,
    error: String,
}

impl<'a> FillPipeline<'a> {
    pub(crate) fn new(
        cfg: &'a FillConfig,
        chain: Arc<ForkChain>,
        tool: Arc<dyn TransitionTool + Send + Sync>,
    ) -> Self {
        Self {
            cfg,
            chain,
            tool,
            builder: None,
            tool_version: String::new(),
            targets: Vec::new(),
            cases: None,
            outcomes: None,
        }
    }

    /// Sets up the fill pipeline.
    ///
    /// ## Tasks
    /// 1. Ask the transition tool for its version.
    /// 2. Resolve the forks to fill for.
    /// 3. Gather the instances to fill from the filler files.
    pub(crate) async fn setup(mut self) -> Result<Self> {
        self.tool_version = self
            .tool
            .version()
            .await
            .map_err(|e| eyre!("Transition tool did not report a version: {e}"))?;
        info!(target: "pipeline", "Using transition tool: {}", self.tool_version);

        self.builder = Some(FixtureBuilder::new(
            self.tool.clone(),
            BuildOptions {
                chain_id: self.cfg.chain_id,
                trace: self.cfg.traces,
                engine_api: self.cfg.enable_hive,
                dump_dir: self.cfg.t8n_dump_dir.clone(),
                tool_version: self.tool_version.clone(),
            },
        ));

        self.targets = match &self.cfg.fork {
            Some(name) => vec![self.chain.resolve(name)?],
            None => self
                .chain
                .fill_targets(self.cfg.from.as_deref(), self.cfg.until.as_deref())?,
        };
        ensure!(!self.targets.is_empty(), "No forks in the selected range");
        info!(
            target: "pipeline",
            "Filling for forks: {}",
            self.targets.iter().map(|f| f.name()).join(", ")
        );

        self.cases = Some(self.gather_cases()?);
        Ok(self)
    }

    /// Fills every instance in a parallel worker pool.
    ///
    /// A failed instance is recorded and never aborts its siblings.
    pub(crate) async fn run(mut self) -> Result<Self> {
        let cases = self.cases.clone().ok_or(eyre!("No instances to fill"))?;
        let builder = self.builder.clone().ok_or(eyre!("Pipeline was not set up"))?;
        let num_cases = cases.len();

        println!(
            "\n\nFilling {} instances across {} forks...",
            num_cases.blue(),
            self.targets.len().blue()
        );

        let multi_progress = Arc::new(Mutex::new(MultiProgress::new()));
        let semaphore = Arc::new(Semaphore::new(self.cfg.workers.get()));
        let mut join_set = JoinSet::new();

        for (index, case) in cases.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let multi_progress = multi_progress.clone();
            let builder = builder.clone();

            join_set.spawn(async move {
                // Aquire a permit on the semaphore. Once the permit is aquired, we can begin
                // filling the instance.
                let _permit = semaphore.acquire().await?;

                // Set up the progress bar.
                let pb = multi_progress.lock().await.add(ProgressBar::new_spinner());
                pb.set_style(
                    ProgressStyle::with_template("{prefix:.bold} {spinner} {wide_msg}")?
                        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
                );
                pb.set_prefix(format!("{}::{}", case.module.cyan(), case.display_name.blue()));
                pb.enable_steady_tick(Duration::from_millis(50));
                pb.set_message("Filling...");

                let start_time = time::Instant::now();
                let result = case.run(&builder).await;

                pb.finish_with_message(format!(
                    "{} {} Took {} {} Status: {}",
                    "Done".green().bold(),
                    "|".black(),
                    HumanDuration(start_time.elapsed()).magenta(),
                    "|".black(),
                    if result.is_ok() {
                        "FILLED".green().bold().to_string()
                    } else {
                        "FAILED".red().bold().italic().to_string()
                    }
                ));

                Ok::<_, color_eyre::Report>((index, result))
            });
        }

        // Buffer results by submission index, so collection order never depends on timing.
        let mut outcomes = (0..num_cases).map(|_| None).collect::<Vec<_>>();
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined??;
            outcomes[index] = Some(result);
        }
        self.outcomes = Some(
            outcomes
                .into_iter()
                .map(|o| o.ok_or(eyre!("Instance did not report a result")))
                .collect::<Result<Vec<_>>>()?,
        );

        Ok(self)
    }

    /// Collects the filled fixtures and reports on the run.
    ///
    /// ## Tasks
    /// 1. Add every successful record to the collector, module by module, and flush each module
    ///    that has at least one.
    /// 2. Print the failed instances.
    /// 3. Write the run manifest to the output directory.
    pub(crate) async fn teardown(mut self) -> Result<()> {
        let cases = self.cases.take().ok_or(eyre!("No instances to fill"))?;
        let outcomes = self.outcomes.take().ok_or(eyre!("Pipeline was not run"))?;

        let mut collector = FixtureCollector::new(self.cfg.output.clone(), self.cfg.flat_output);
        let mut fixture_files = Vec::new();
        let mut failures = Vec::new();
        let mut filled = 0;

        let instances = cases.into_iter().zip(outcomes);
        for (module, chunk) in &instances.chunk_by(|(case, _)| case.module.clone()) {
            let mut any_filled = false;
            for (case, outcome) in chunk {
                match outcome {
                    Ok(record) => {
                        collector.add(&module, &case.display_name, record)?;
                        any_filled = true;
                        filled += 1;
                    }
                    Err(e) => {
                        warn!(target: "pipeline", "{}::{} failed: {}", module, case.display_name, e);
                        failures.push(ManifestFailure {
                            module: module.clone(),
                            fixture: case.display_name,
                            error: e.to_string(),
                        });
                    }
                }
            }
            if any_filled {
                fixture_files.push(collector.flush(&module)?);
            }
        }

        if !failures.is_empty() {
            let table = failures
                .iter()
                .map(|f| vec![f.module.as_str().cell(), f.fixture.as_str().cell(), f.error.as_str().cell()])
                .collect::<Vec<_>>()
                .table()
                .title(vec!["Module".cell(), "Fixture".cell(), "Error".cell()])
                .bold(true);
            cli_table::print_stdout(table)?;
        }

        let manifest = RunManifest {
            filling_transition_tool: self.tool_version.clone(),
            forks: self.targets.iter().map(|f| f.name().to_string()).collect(),
            filled,
            failed: failures.len(),
            fixture_files,
            failures,
        };
        fs::create_dir_all(collector.output_dir())?;
        let manifest_path = collector.output_dir().join("manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        info!(target: "pipeline", "Wrote run manifest to {}", manifest_path.display());

        println!(
            "{} - {} instances {}, {} instances {}.\n",
            "Completed".bold(),
            manifest.filled.to_string().blue().bold(),
            "filled".green().bold(),
            manifest.failed.to_string().blue().bold(),
            "failed".red().bold()
        );

        Ok(())
    }

    /// Gathers the [FillCase]s to execute from the filler directory.
    fn gather_cases(&self) -> Result<Vec<FillCase>> {
        let root = fs::canonicalize(&self.cfg.fillers)
            .map_err(|e| eyre!("Filler directory {} is unreadable: {e}", self.cfg.fillers.display()))?;
        let pattern = root.join("**").join("*.toml");
        let filter = glob::Pattern::new(self.cfg.test.as_deref().unwrap_or("*"))?;

        let mut cases = Vec::new();
        for path in glob::glob(&pattern.to_string_lossy())? {
            let path = path?;
            let file_module = module_id(path.strip_prefix(&root)?);
            if !filter.matches(&file_module) {
                continue;
            }

            let file = toml::from_str::<ScenarioFile>(&fs::read_to_string(&path)?)
                .map_err(|e| eyre!("Failed to parse {}: {e}", path.display()))?;

            let mut ids = HashSet::new();
            for scenario in file.scenario {
                ensure!(
                    ids.insert(scenario.id.clone()),
                    "Scenario {} is defined more than once in {}",
                    scenario.id,
                    path.display()
                );

                let module = format!("{file_module}/{}", scenario.id);
                let scenario = Arc::new(scenario);
                for fork in self.targets.iter() {
                    if !scenario.applies_to(&self.chain, fork)? {
                        continue;
                    }
                    for variant in scenario.variants(&self.cfg.eips) {
                        cases.push(FillCase::new(
                            module.clone(),
                            scenario.clone(),
                            fork.clone(),
                            variant,
                        ));
                    }
                }
            }
        }

        info!(target: "pipeline", "Gathered {} instance(s)", cases.len());
        Ok(cases)
    }
}

/// The module id of a filler file, relative to the filler root: its path without extension, with
/// any `test_` prefix stripped from the file name.
fn module_id(relative: &Path) -> String {
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = stem.strip_prefix("test_").unwrap_or(&stem);
    relative
        .with_file_name(stem)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .join("/")
}
