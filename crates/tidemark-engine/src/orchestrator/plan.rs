//! Execution ordering.
//!
//! Jobs that already succeeded today drop out. What remains is ordered with
//! Kahn's algorithm over the edges that are still unsatisfied; ties keep the
//! order the candidates were given in.

use std::collections::{HashMap, HashSet, VecDeque};

use tidemark_types::control::{DependencyKind, JobDependency, JobId, JobRegistration};

use crate::errors::{PipelineError, Result};

fn is_satisfied(
    edge: &JobDependency,
    succeeded_today: &HashSet<JobId>,
    ever_succeeded: &HashSet<JobId>,
) -> bool {
    match edge.kind {
        DependencyKind::SameDay => succeeded_today.contains(&edge.depends_on),
        DependencyKind::Latest => ever_succeeded.contains(&edge.depends_on),
    }
}

/// Order `candidates` so every job runs after its unsatisfied upstreams.
///
/// Edges with either end outside the to-run set are ignored.
///
/// # Errors
///
/// Returns [`PipelineError::DependencyCycle`] naming the jobs that could not
/// be ordered.
pub fn build_execution_plan(
    candidates: &[JobRegistration],
    dependencies: &[JobDependency],
    succeeded_today: &HashSet<JobId>,
    ever_succeeded: &HashSet<JobId>,
) -> Result<Vec<JobRegistration>> {
    let to_run: Vec<&JobRegistration> = candidates
        .iter()
        .filter(|job| !succeeded_today.contains(&job.id))
        .collect();
    let position: HashMap<JobId, usize> = to_run
        .iter()
        .enumerate()
        .map(|(i, job)| (job.id, i))
        .collect();

    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); to_run.len()];
    for edge in dependencies {
        let (Some(&job), Some(&upstream)) =
            (position.get(&edge.job_id), position.get(&edge.depends_on))
        else {
            continue;
        };
        if !is_satisfied(edge, succeeded_today, ever_succeeded) {
            downstream[upstream].push(job);
        }
    }

    let mut in_degree = vec![0usize; to_run.len()];
    for edges in &mut downstream {
        edges.sort_unstable();
        edges.dedup();
        for &job in edges.iter() {
            in_degree[job] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..to_run.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(to_run.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &next in &downstream[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != to_run.len() {
        let jobs = (0..to_run.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| to_run[i].name.clone())
            .collect();
        return Err(PipelineError::DependencyCycle { jobs });
    }

    Ok(order.into_iter().map(|i| to_run[i].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: i64, name: &str) -> JobRegistration {
        JobRegistration {
            id: JobId::new(id),
            name: name.into(),
            description: None,
            definition_path: format!("jobs/{name}.json"),
            is_active: true,
        }
    }

    fn edge(job: i64, depends_on: i64, kind: DependencyKind) -> JobDependency {
        JobDependency {
            job_id: JobId::new(job),
            depends_on: JobId::new(depends_on),
            kind,
        }
    }

    fn names(plan: &[JobRegistration]) -> Vec<&str> {
        plan.iter().map(|j| j.name.as_str()).collect()
    }

    fn ids(ids: &[i64]) -> HashSet<JobId> {
        ids.iter().copied().map(JobId::new).collect()
    }

    #[test]
    fn upstream_runs_first() {
        let jobs = [job(1, "c"), job(2, "b"), job(3, "a")];
        let deps = [
            edge(1, 2, DependencyKind::SameDay),
            edge(2, 3, DependencyKind::SameDay),
        ];
        let plan = build_execution_plan(&jobs, &deps, &ids(&[]), &ids(&[])).unwrap();
        assert_eq!(names(&plan), ["a", "b", "c"]);
    }

    #[test]
    fn ties_keep_candidate_order() {
        let jobs = [job(1, "x"), job(2, "y"), job(3, "z"), job(4, "root")];
        let deps = [
            edge(3, 4, DependencyKind::SameDay),
            edge(1, 4, DependencyKind::SameDay),
        ];
        let plan = build_execution_plan(&jobs, &deps, &ids(&[]), &ids(&[])).unwrap();
        assert_eq!(names(&plan), ["y", "root", "x", "z"]);
    }

    #[test]
    fn succeeded_today_drops_out_and_satisfies_same_day() {
        let jobs = [job(1, "b"), job(2, "a")];
        let deps = [edge(1, 2, DependencyKind::SameDay)];
        let plan = build_execution_plan(&jobs, &deps, &ids(&[2]), &ids(&[2])).unwrap();
        assert_eq!(names(&plan), ["b"]);
    }

    #[test]
    fn latest_edge_satisfied_by_any_past_success() {
        // Cycle through a satisfied Latest edge is not a cycle.
        let jobs = [job(1, "a"), job(2, "b")];
        let deps = [
            edge(1, 2, DependencyKind::SameDay),
            edge(2, 1, DependencyKind::Latest),
        ];
        let plan = build_execution_plan(&jobs, &deps, &ids(&[]), &ids(&[1])).unwrap();
        assert_eq!(names(&plan), ["b", "a"]);
    }

    #[test]
    fn edges_to_outside_jobs_are_ignored() {
        let jobs = [job(1, "a")];
        let deps = [edge(1, 99, DependencyKind::SameDay)];
        let plan = build_execution_plan(&jobs, &deps, &ids(&[]), &ids(&[])).unwrap();
        assert_eq!(names(&plan), ["a"]);
    }

    #[test]
    fn cycle_names_the_stuck_jobs() {
        let jobs = [job(1, "a"), job(2, "b"), job(3, "free")];
        let deps = [
            edge(1, 2, DependencyKind::SameDay),
            edge(2, 1, DependencyKind::SameDay),
        ];
        let err = build_execution_plan(&jobs, &deps, &ids(&[]), &ids(&[])).unwrap_err();
        match err {
            PipelineError::DependencyCycle { jobs } => assert_eq!(jobs, ["a", "b"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn duplicate_edges_count_once() {
        let jobs = [job(1, "a"), job(2, "b")];
        let deps = [
            edge(2, 1, DependencyKind::SameDay),
            edge(2, 1, DependencyKind::Latest),
        ];
        let plan = build_execution_plan(&jobs, &deps, &ids(&[]), &ids(&[])).unwrap();
        assert_eq!(names(&plan), ["a", "b"]);
    }
}
