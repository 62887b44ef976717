use serde::{Deserialize, Serialize};

/// One structured creative-prompt record recognized in a model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    /// The generated creative prompt.
    pub prompt: String,
    /// Rationale for the creative direction.
    pub description: String,
    /// Free-form label, e.g. "photography".
    pub category: String,
    /// Short tags in the order the model wrote them.
    pub tags: Vec<String>,
}
