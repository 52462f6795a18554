//! Static complexity-to-model routing.
//!
//! Each node declares a fixed [`Complexity`] tag; the router maps it to a
//! concrete model endpoint identifier. The tags are plain config data,
//! not a computed classification.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Static task-complexity bucket assigned to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Extraction, formatting, short summaries.
    Simple,
    /// General analysis and synthesis.
    Medium,
    /// Architecture, multi-constraint planning, deep reasoning.
    Complex,
}

/// Maps complexity tags to concrete model endpoint identifiers.
///
/// The default mapping is ordinary config data and can be overridden per
/// deployment via [`with_model`](Self::with_model).
///
/// # Examples
///
/// ```
/// use taskloom::router::{Complexity, ModelRouter};
///
/// let router = ModelRouter::default().with_model(Complexity::Complex, "o3");
/// assert_eq!(router.route(Complexity::Complex), "o3");
/// ```
#[derive(Clone, Debug)]
pub struct ModelRouter {
    models: FxHashMap<Complexity, String>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        let mut models = FxHashMap::default();
        models.insert(Complexity::Simple, "gpt-4o-mini".to_string());
        models.insert(Complexity::Medium, "gpt-4o".to_string());
        models.insert(Complexity::Complex, "o3".to_string());
        Self { models }
    }
}

impl ModelRouter {
    /// Override the endpoint used for one complexity bucket.
    #[must_use]
    pub fn with_model(mut self, complexity: Complexity, model_id: impl Into<String>) -> Self {
        self.models.insert(complexity, model_id.into());
        self
    }

    /// Resolve a complexity tag to its configured model endpoint id.
    #[must_use]
    pub fn route(&self, complexity: Complexity) -> &str {
        // Every bucket is populated by Default and with_model only replaces.
        self.models
            .get(&complexity)
            .map(String::as_str)
            .unwrap_or("gpt-4o")
    }
}
