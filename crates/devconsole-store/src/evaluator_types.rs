//! Catalogue of evaluator types an evaluator definition may reference.

/// Static description of an evaluator type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorType {
    /// Stable identifier stored in `evaluatorTypeId`.
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Keys expected inside an evaluation's criteria for this type.
    pub criteria_keys: &'static [&'static str],
}

/// Every evaluator type known to the console.
pub const EVALUATOR_TYPES: &[EvaluatorType] = &[
    EvaluatorType {
        id: "exact-match",
        name: "Exact Match",
        description: "Output must equal the expected output exactly",
        criteria_keys: &["expectedOutput"],
    },
    EvaluatorType {
        id: "contains",
        name: "Contains",
        description: "Serialized output must contain the search text",
        criteria_keys: &["searchText"],
    },
    EvaluatorType {
        id: "json-similarity",
        name: "JSON Similarity",
        description: "Fraction of expected JSON leaves present in the output",
        criteria_keys: &["expectedOutput"],
    },
    EvaluatorType {
        id: "llm-judge-output",
        name: "LLM Judge (Output)",
        description: "A model grades the output against the expected output",
        criteria_keys: &["expectedOutput"],
    },
    EvaluatorType {
        id: "tool-call-order",
        name: "Tool Call Order",
        description: "Tool calls must happen in the expected order",
        criteria_keys: &["toolCallsOrder"],
    },
];

/// Look up an evaluator type by ID.
pub fn get_evaluator_type(type_id: &str) -> Option<&'static EvaluatorType> {
    EVALUATOR_TYPES.iter().find(|t| t.id == type_id)
}
