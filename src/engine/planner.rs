use crate::engine::templates::{OWASP_AGENTIC_CATEGORIES, OWASP_LLM_TOP10_CATEGORIES};
use crate::models::{SubType, TestingLevel};

/// Total test-case budget per testing level (spec §4.3).
fn total_budget(level: TestingLevel) -> u32 {
    match level {
        TestingLevel::Basic => 500,
        TestingLevel::Moderate => 1200,
        TestingLevel::Aggressive => 2000,
    }
}

/// `(converter_probability, min_converters, max_converters)` per level:
/// how likely a generated prompt is obfuscated, and the chain depth.
pub fn knob_scaling(level: TestingLevel) -> (f64, usize, usize) {
    match level {
        TestingLevel::Basic => (0.20, 1, 1),
        TestingLevel::Moderate => (0.40, 2, 2),
        TestingLevel::Aggressive => (0.50, 3, 3),
    }
}

fn categories_for(sub_type: SubType) -> &'static [&'static str] {
    match sub_type {
        SubType::OwaspLlmTop10 => OWASP_LLM_TOP10_CATEGORIES,
        SubType::OwaspAgentic => OWASP_AGENTIC_CATEGORIES,
        SubType::Adaptive => &["adaptive_escalation"],
        SubType::ScopeValidation => &["scope_validation"],
        SubType::UserInteraction => &["user_interaction"],
        SubType::Functional => &["functional"],
    }
}

/// Fixed category weights for `owasp_llm_top10` (spec §8 scenario 1), in
/// the same order as `OWASP_LLM_TOP10_CATEGORIES`. They sum to 0.95, not
/// 1.0 — the remaining 5% of the budget lands on the last category via
/// `allocate`'s remainder-to-last rule.
const OWASP_LLM_TOP10_WEIGHTS: &[f64] = &[0.20, 0.10, 0.05, 0.05, 0.05, 0.15, 0.08, 0.12, 0.10, 0.05];

fn weights_for(sub_type: SubType) -> Option<&'static [f64]> {
    match sub_type {
        SubType::OwaspLlmTop10 => Some(OWASP_LLM_TOP10_WEIGHTS),
        _ => None,
    }
}

/// Splits `total` across `categories` by `weights` (or evenly when no
/// weight table is defined), truncating each share and dumping the
/// leftover from truncation onto the last category.
fn allocate(total: u32, categories: &'static [&'static str], weights: Option<&[f64]>) -> Vec<CategoryAllocation> {
    let n = categories.len();
    let shares: Vec<u32> = match weights {
        Some(weights) => weights.iter().map(|w| (total as f64 * w).floor() as u32).collect(),
        None => {
            let base = total / n as u32;
            vec![base; n]
        }
    };
    let remainder = total - shares.iter().sum::<u32>();
    categories
        .iter()
        .zip(shares)
        .enumerate()
        .map(|(i, (category, share))| {
            let count = if i == n - 1 { share + remainder } else { share };
            CategoryAllocation { risk_category: category, count }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct CategoryAllocation {
    pub risk_category: &'static str,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub total: u32,
    pub converter_probability: f64,
    pub min_converters: usize,
    pub max_converters: usize,
    pub categories: Vec<CategoryAllocation>,
}

/// Builds the generation plan for `(sub_type, testing_level)` (spec §4.3):
/// total budget split evenly across the sub_type's risk categories, any
/// remainder going to the last category. `adaptive_escalation` instead
/// allocates `total / 5` multi-turn conversations (each conversation is
/// 5 turns), per `original_source`'s adaptive executor.
pub fn build_plan(sub_type: SubType, testing_level: TestingLevel) -> Plan {
    let total = total_budget(testing_level);
    let (converter_probability, min_converters, max_converters) = knob_scaling(testing_level);
    let categories = categories_for(sub_type);

    let allocations = if sub_type == SubType::Adaptive {
        let conversations = (total / 5).max(1);
        vec![CategoryAllocation { risk_category: "adaptive_escalation", count: conversations }]
    } else {
        allocate(total, categories, weights_for(sub_type))
    };

    Plan { total, converter_probability, min_converters, max_converters, categories: allocations }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owasp_top10_matches_literal_plan_math_scenario() {
        let plan = build_plan(SubType::OwaspLlmTop10, TestingLevel::Basic);
        assert_eq!(plan.total, 500);
        assert_eq!(plan.converter_probability, 0.20);
        assert_eq!(plan.max_converters, 1);
        let counts: Vec<u32> = plan.categories.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![100, 50, 25, 25, 25, 75, 40, 60, 50, 50]);
        assert_eq!(counts.iter().sum::<u32>(), 500);
    }

    #[test]
    fn adaptive_allocates_conversations() {
        let plan = build_plan(SubType::Adaptive, TestingLevel::Moderate);
        assert_eq!(plan.categories.len(), 1);
        assert_eq!(plan.categories[0].count, 1200 / 5);
    }

    #[test]
    fn aggressive_has_deepest_converter_chain() {
        let (prob, min_c, max_c) = knob_scaling(TestingLevel::Aggressive);
        assert_eq!((prob, min_c, max_c), (0.50, 3, 3));
    }
}
