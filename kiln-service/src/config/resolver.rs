// Dependency resolution
// Layered topological sort over `requires` edges

use crate::config::error::{ConfigError, ConfigResult};

use indexmap::IndexMap;
use std::collections::HashSet;

/// Compute an execution order for `jobs` honouring `dependencies`.
///
/// Each pass collects every remaining job whose dependencies are all
/// resolved, appending them in iteration order. A pass that selects nothing
/// while jobs remain means a cycle (or an unsatisfiable edge), and the error
/// lists every stuck job with its unmet dependencies.
pub fn resolve_order<'a>(
    jobs: impl IntoIterator<Item = &'a str>,
    dependencies: &IndexMap<String, Vec<String>>,
) -> ConfigResult<Vec<String>> {
    let mut remaining: Vec<&str> = jobs.into_iter().collect();
    let mut resolved: Vec<String> = Vec::with_capacity(remaining.len());
    let mut done: HashSet<&str> = HashSet::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|job| {
                dependencies
                    .get(*job)
                    .map(|deps| deps.iter().all(|dep| done.contains(dep.as_str())))
                    .unwrap_or(true)
            })
            .collect();

        if ready.is_empty() {
            let stuck = remaining
                .iter()
                .map(|job| {
                    let mut unmet: Vec<&str> = dependencies
                        .get(*job)
                        .map(|deps| {
                            deps.iter()
                                .map(String::as_str)
                                .filter(|dep| !done.contains(*dep))
                                .collect()
                        })
                        .unwrap_or_default();
                    unmet.sort_unstable();
                    format!("{} -> [{}]", job, unmet.join(", "))
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::cyclic(format!(
                "Circular or unsatisfied job dependencies detected: {}",
                stuck
            )));
        }

        for job in ready {
            done.insert(job);
            resolved.push(job.to_string());
        }
        remaining.retain(|job| !done.contains(*job));
    }

    Ok(resolved)
}
