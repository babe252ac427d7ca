pub mod patterns;
pub mod pipeline;

pub use pipeline::{
    evaluate_prompt, invalidate_auth_cache, invalidate_rules_cache, invalidate_scope_cache, FirewallInput, Verdict,
};
