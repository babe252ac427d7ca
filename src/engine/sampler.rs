use crate::models::{ExperimentResult, ResultStatus, TestCase, TestingLevel};
use rand::seq::IndexedRandom;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Overall representative-set size target per testing level (spec §4.8).
fn target_for(testing_level: TestingLevel) -> usize {
    match testing_level {
        TestingLevel::Basic => 50,
        TestingLevel::Moderate => 80,
        TestingLevel::Aggressive => 100,
    }
}

/// Stratified representative sampling, the literal 5-step algorithm from
/// spec §4.8 (ported from `original_source`'s `select_examples()`):
/// 1. include every high-severity failure,
/// 2. include every errored test case,
/// 3. include every case the judge was unsure about (`confidence < 0.5`),
/// 4. for each risk_category, make sure at least one pass and one fail
///    already selected (or not) are represented by drawing one of each,
/// 5. fill remaining slots up to the testing_level's target by random
///    draw from whatever's left unselected.
pub fn select_representatives(test_cases: &[TestCase], results: &[ExperimentResult], testing_level: TestingLevel) -> Vec<Uuid> {
    let result_by_case: HashMap<Uuid, &ExperimentResult> = results.iter().map(|r| (r.test_case_id, r)).collect();
    let mut rng = rand::rng();
    let mut selected: HashSet<Uuid> = HashSet::new();

    for tc in test_cases {
        if let Some(result) = result_by_case.get(&tc.id) {
            if result.result == ResultStatus::Fail && result.severity == Some(crate::models::Severity::High) {
                selected.insert(tc.id);
            }
        }
    }

    for tc in test_cases {
        if matches!(result_by_case.get(&tc.id), Some(r) if r.result == ResultStatus::Error) {
            selected.insert(tc.id);
        }
    }

    for tc in test_cases {
        if matches!(result_by_case.get(&tc.id), Some(r) if r.confidence.is_some_and(|c| c < 0.5)) {
            selected.insert(tc.id);
        }
    }

    let mut by_category: HashMap<&str, Vec<&TestCase>> = HashMap::new();
    for tc in test_cases {
        by_category.entry(tc.risk_category.as_str()).or_default().push(tc);
    }
    for group in by_category.values() {
        let passes: Vec<&&TestCase> = group
            .iter()
            .filter(|tc| matches!(result_by_case.get(&tc.id), Some(r) if r.result == ResultStatus::Pass))
            .collect();
        let fails: Vec<&&TestCase> = group
            .iter()
            .filter(|tc| matches!(result_by_case.get(&tc.id), Some(r) if r.result == ResultStatus::Fail))
            .collect();
        if !passes.iter().any(|tc| selected.contains(&tc.id)) {
            if let Some(tc) = passes.choose(&mut rng) {
                selected.insert(tc.id);
            }
        }
        if !fails.iter().any(|tc| selected.contains(&tc.id)) {
            if let Some(tc) = fails.choose(&mut rng) {
                selected.insert(tc.id);
            }
        }
    }

    let target = target_for(testing_level);
    if selected.len() < target {
        let remaining = target - selected.len();
        let pool: Vec<Uuid> = test_cases.iter().map(|tc| tc.id).filter(|id| !selected.contains(id)).collect();
        selected.extend(pool.choose_multiple(&mut rng, remaining.min(pool.len())).copied());
    }

    selected.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn case(id: Uuid, category: &str) -> TestCase {
        TestCase {
            id,
            experiment_id: Uuid::new_v4(),
            sequence_order: 0,
            prompt: "p".to_string(),
            response: Some("r".to_string()),
            conversation: None,
            conversation_plan: None,
            risk_category: category.to_string(),
            data_strategy: "none".to_string(),
            attack_converter: None,
            expected_behaviour: None,
            is_representative: false,
            latency_ms: Some(10),
        }
    }

    fn result(test_case_id: Uuid, status: ResultStatus, severity: Option<Severity>) -> ExperimentResult {
        ExperimentResult { id: Uuid::new_v4(), test_case_id, result: status, severity, confidence: Some(0.9), explanation: None, owasp_mapping: None }
    }

    #[test]
    fn every_high_severity_fail_is_included_uncapped() {
        let cases: Vec<TestCase> = (0..10).map(|_| case(Uuid::new_v4(), "prompt_injection")).collect();
        let results: Vec<ExperimentResult> =
            cases.iter().map(|tc| result(tc.id, ResultStatus::Fail, Some(Severity::High))).collect();
        let selected = select_representatives(&cases, &results, TestingLevel::Basic);
        for tc in &cases {
            assert!(selected.contains(&tc.id), "high-severity fail {} dropped", tc.id);
        }
    }

    #[test]
    fn every_error_case_is_included() {
        let error_id = Uuid::new_v4();
        let cases = vec![case(error_id, "functional")];
        let results = vec![result(error_id, ResultStatus::Error, None)];
        let selected = select_representatives(&cases, &results, TestingLevel::Basic);
        assert!(selected.contains(&error_id));
    }

    #[test]
    fn low_confidence_cases_are_included_regardless_of_verdict() {
        let unsure_id = Uuid::new_v4();
        let cases = vec![case(unsure_id, "functional")];
        let results = vec![ExperimentResult { confidence: Some(0.2), ..result(unsure_id, ResultStatus::Pass, None) }];
        let selected = select_representatives(&cases, &results, TestingLevel::Basic);
        assert!(selected.contains(&unsure_id));
    }

    #[test]
    fn each_category_gets_at_least_one_pass_and_one_fail() {
        let pass_id = Uuid::new_v4();
        let fail_id = Uuid::new_v4();
        let cases = vec![case(pass_id, "functional"), case(fail_id, "functional")];
        let results = vec![
            result(pass_id, ResultStatus::Pass, None),
            result(fail_id, ResultStatus::Fail, Some(Severity::Low)),
        ];
        let selected = select_representatives(&cases, &results, TestingLevel::Basic);
        assert!(selected.contains(&pass_id));
        assert!(selected.contains(&fail_id));
    }

    #[test]
    fn fills_remaining_slots_up_to_testing_level_target() {
        let cases: Vec<TestCase> = (0..120).map(|_| case(Uuid::new_v4(), "functional")).collect();
        let results: Vec<ExperimentResult> = cases.iter().map(|tc| result(tc.id, ResultStatus::Pass, None)).collect();
        let selected = select_representatives(&cases, &results, TestingLevel::Basic);
        assert_eq!(selected.len(), 50);
    }

    #[test]
    fn aggressive_targets_one_hundred() {
        let cases: Vec<TestCase> = (0..150).map(|_| case(Uuid::new_v4(), "functional")).collect();
        let results: Vec<ExperimentResult> = cases.iter().map(|tc| result(tc.id, ResultStatus::Pass, None)).collect();
        let selected = select_representatives(&cases, &results, TestingLevel::Aggressive);
        assert_eq!(selected.len(), 100);
    }
}
