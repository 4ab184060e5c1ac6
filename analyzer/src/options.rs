// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::env;
use std::time::Duration;

///
/// Tunables for the analyzer. The only environmental input honored is the maximum analysis
/// parallelism.
///
#[derive(Clone, Debug)]
pub struct AnalyzerOptions {
    /// Hard bound on concurrent analysis tasks per session. Defaults to the CPU count.
    pub max_tasks: usize,
    /// Whether library analyses are persisted through the cache service (and their ASTs
    /// downgraded to import skeletons) once all dependencies have been walked.
    pub cache_libraries: bool,
    /// The timeout applied to `get_analysis` calls that pass no explicit wait. `None` waits
    /// until the analysis completes.
    pub default_get_analysis_timeout: Option<Duration>,
    /// Disables `get_analysis` timeouts entirely, e.g. while a debugger is attached.
    pub disable_timeout: bool,
}

impl AnalyzerOptions {
    pub fn new() -> AnalyzerOptions {
        AnalyzerOptions {
            max_tasks: task_executor::default_parallelism(),
            cache_libraries: true,
            default_get_analysis_timeout: None,
            disable_timeout: false,
        }
    }

    ///
    /// Like `new`, but honoring the `ANALYSIS_MAX_TASKS` environment variable.
    ///
    pub fn from_env() -> AnalyzerOptions {
        let mut options = AnalyzerOptions::new();
        if let Some(max_tasks) = env::var("ANALYSIS_MAX_TASKS").ok().and_then(|v| v.parse::<usize>().ok()) {
            options.max_tasks = max_tasks.max(1);
        }
        options
    }
}
