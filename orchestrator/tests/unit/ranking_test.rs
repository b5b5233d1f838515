//! 候補ランキングのUnit Test
//!
//! - 成功率の高い候補を優先
//! - 同率時はp95、負荷、登録順の順でタイブレーク
//! - 同じ入力からは常に同じ順序

use llm_orchestrator::balancer::{compare_candidates, rank_candidates, Candidate};
use llm_orchestrator::metrics::RouteStats;
use llm_orchestrator::ServerModelKey;
use std::cmp::Ordering;

fn create_candidate(
    name: &str,
    index: usize,
    success_rate: f64,
    p95_ms: f64,
    load: u64,
) -> Candidate {
    Candidate {
        key: ServerModelKey::new(name, "llama3"),
        registration_index: index,
        stats: RouteStats {
            success_rate,
            p95_ms,
            load,
        },
    }
}

fn names(candidates: &[Candidate]) -> Vec<&str> {
    candidates.iter().map(|c| c.key.server_id.as_str()).collect()
}

#[test]
fn test_rank_mixed_pool() {
    let mut candidates = vec![
        create_candidate("flaky", 0, 0.6, 50.0, 0),
        create_candidate("busy", 1, 1.0, 80.0, 9),
        create_candidate("idle", 2, 1.0, 80.0, 0),
        create_candidate("slow", 3, 1.0, 400.0, 0),
    ];

    rank_candidates(&mut candidates);

    assert_eq!(names(&candidates), vec!["idle", "busy", "slow", "flaky"]);
}

#[test]
fn test_unobserved_candidates_rank_like_perfect_ones() {
    let fresh = create_candidate("fresh", 1, RouteStats::default().success_rate, 0.0, 0);
    let proven = create_candidate("proven", 0, 1.0, 120.0, 0);

    assert_eq!(compare_candidates(&fresh, &proven), Ordering::Less);
}

#[test]
fn test_rank_is_stable_across_calls() {
    let pool = vec![
        create_candidate("c", 2, 1.0, 0.0, 0),
        create_candidate("a", 0, 1.0, 0.0, 0),
        create_candidate("b", 1, 1.0, 0.0, 0),
    ];

    let mut first = pool.clone();
    let mut second = pool;
    rank_candidates(&mut first);
    rank_candidates(&mut second);

    assert_eq!(names(&first), vec!["a", "b", "c"]);
    assert_eq!(first, second);
}

#[test]
fn test_zero_success_rate_still_ranks() {
    let mut candidates = vec![
        create_candidate("dead", 0, 0.0, 0.0, 0),
        create_candidate("half", 1, 0.5, 1000.0, 5),
    ];

    rank_candidates(&mut candidates);

    assert_eq!(names(&candidates), vec!["half", "dead"]);
}
