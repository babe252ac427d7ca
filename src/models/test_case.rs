use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub sequence_order: u32,
    pub prompt: String,
    pub response: Option<String>,
    pub conversation: Option<Vec<ConversationTurn>>,
    /// Planned turn texts for a multi-turn test case, set by the generator
    /// and consumed by the runner to drive `execute_conversation`; `None`
    /// for single-turn test cases.
    pub conversation_plan: Option<Vec<String>>,
    pub risk_category: String,
    pub data_strategy: String,
    pub attack_converter: Option<String>,
    pub expected_behaviour: Option<String>,
    pub is_representative: bool,
    pub latency_ms: Option<u64>,
}
