use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use tidemark_engine::orchestrator::{build_execution_plan, pending_effective_dates};
use tidemark_types::control::{DependencyKind, JobDependency, JobId, JobRegistration};

fn jobs(n: usize) -> Vec<JobRegistration> {
    (0..n)
        .map(|i| JobRegistration {
            id: JobId::new(i as i64 + 1),
            name: format!("job_{i}"),
            description: None,
            definition_path: format!("jobs/job_{i}.json"),
            is_active: true,
        })
        .collect()
}

/// Edges always point from a higher index to a lower one, so the graph is acyclic.
fn dag() -> impl Strategy<Value = (usize, Vec<JobDependency>, HashSet<JobId>, HashSet<JobId>)> {
    (2usize..10).prop_flat_map(|n| {
        let edge = (1..n, any::<bool>(), any::<prop::sample::Index>()).prop_map(
            |(job, same_day, upstream)| JobDependency {
                job_id: JobId::new(job as i64 + 1),
                depends_on: JobId::new(upstream.index(job) as i64 + 1),
                kind: if same_day {
                    DependencyKind::SameDay
                } else {
                    DependencyKind::Latest
                },
            },
        );
        let ids = prop::collection::hash_set((1..=n as i64).prop_map(JobId::new), 0..n);
        (
            Just(n),
            prop::collection::vec(edge, 0..20),
            ids.clone(),
            ids,
        )
    })
}

proptest! {
    #[test]
    fn plan_orders_every_unsatisfied_edge((n, deps, today, ever) in dag()) {
        let candidates = jobs(n);
        let plan = build_execution_plan(&candidates, &deps, &today, &ever).unwrap();

        let position = |id: JobId| plan.iter().position(|j| j.id == id);
        for job in &candidates {
            prop_assert_eq!(position(job.id).is_some(), !today.contains(&job.id));
        }
        for edge in &deps {
            let satisfied = match edge.kind {
                DependencyKind::SameDay => today.contains(&edge.depends_on),
                DependencyKind::Latest => ever.contains(&edge.depends_on),
            };
            if let (Some(job), Some(upstream), false) =
                (position(edge.job_id), position(edge.depends_on), satisfied)
            {
                prop_assert!(upstream < job);
            }
        }
    }

    #[test]
    fn plan_is_deterministic((n, deps, today, ever) in dag()) {
        let candidates = jobs(n);
        let first = build_execution_plan(&candidates, &deps, &today, &ever).unwrap();
        let second = build_execution_plan(&candidates, &deps, &today, &ever).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn gap_fill_covers_each_day_once(lag in 0u64..60, ahead in 0u64..5) {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let last = today.checked_sub_days(Days::new(lag)).unwrap();
        let dates = pending_effective_dates("job", Some(last), None, today).unwrap();
        prop_assert_eq!(dates.len() as u64, lag);
        prop_assert!(dates.windows(2).all(|w| w[1] == w[0].succ_opt().unwrap()));
        if let Some(first) = dates.first() {
            prop_assert_eq!(*first, last.succ_opt().unwrap());
            prop_assert_eq!(*dates.last().unwrap(), today);
        }

        let future = today.checked_add_days(Days::new(ahead + 1)).unwrap();
        prop_assert!(pending_effective_dates("job", None, Some(future), today).unwrap().is_empty());
    }
}
