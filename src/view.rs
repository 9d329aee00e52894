//! Minimal view component tree.
//!
//! On partial (ajax) renders every token field of the page has to be
//! refreshed, not only the one of the submitted form. The tree lets a
//! renderer find the client ids of all token fields.

/// Kind of a view component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    /// Hidden input field
    HiddenInput,
    /// Form; prefixes the client ids of its descendants
    Form,
    /// Any other component
    Other,
}

/// Component of a rendered view
#[derive(Debug, Clone)]
pub struct ViewNode {
    pub id: String,
    pub kind: ComponentKind,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    /// Create a component without children
    pub fn new(id: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            children: Vec::new(),
        }
    }

    /// Hidden input component
    pub fn hidden_input(id: impl Into<String>) -> Self {
        Self::new(id, ComponentKind::HiddenInput)
    }

    /// Form component
    pub fn form(id: impl Into<String>) -> Self {
        Self::new(id, ComponentKind::Form)
    }

    /// Add a child
    pub fn with_child(mut self, child: ViewNode) -> Self {
        self.children.push(child);
        self
    }

    fn is_token_holder(&self, token_key: &str) -> bool {
        self.kind == ComponentKind::HiddenInput && self.id == token_key
    }
}

/// Client ids of all token fields below `root`.
///
/// The root itself is not inspected, matching a view root that only holds
/// the page's top-level components.
pub fn find_token_component_ids(root: &ViewNode, token_key: &str) -> Vec<String> {
    let mut result = Vec::new();
    for child in &root.children {
        collect(child, token_key, None, &mut result);
    }
    result
}

fn collect(node: &ViewNode, token_key: &str, prefix: Option<&str>, result: &mut Vec<String>) {
    if node.is_token_holder(token_key) {
        result.push(client_id(prefix, &node.id));
        return;
    }

    let own_prefix;
    let prefix = if node.kind == ComponentKind::Form {
        own_prefix = client_id(prefix, &node.id);
        Some(own_prefix.as_str())
    } else {
        prefix
    };

    for child in &node.children {
        collect(child, token_key, prefix, result);
    }
}

fn client_id(prefix: Option<&str>, id: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, id),
        None => id.to_string(),
    }
}
