//! The minimal XPath surface the datastore engine's `get` needs:
//! absolute paths, plain child steps, and at most one
//! `[leaf="value"]` predicate per step. Not a general XPath evaluator —
//! the schema oracle and wire protocol never ask this core for more.

use confcore_contracts::{Category, ConfcoreError, Result};
use confcore_model::Node;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    name: String,
    predicate: Option<(String, String)>,
}

/// A parsed XPath. `steps.is_empty()` means "select the whole tree" —
/// the root path `/` (or an empty expression).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    steps: Vec<Step>,
}

impl XPath {
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }
}

pub fn parse(expr: &str) -> Result<XPath> {
    let expr = expr.trim();
    if expr.is_empty() || expr == "/" {
        return Ok(XPath { steps: Vec::new() });
    }
    if !expr.starts_with('/') {
        return Err(ConfcoreError::new(Category::Xml, format!("xpath must be absolute: {expr}")));
    }

    let mut steps = Vec::new();
    for segment in expr.trim_start_matches('/').split('/') {
        if segment.is_empty() {
            return Err(ConfcoreError::new(Category::Xml, format!("empty step in xpath: {expr}")));
        }
        steps.push(parse_step(segment, expr)?);
    }
    Ok(XPath { steps })
}

fn parse_step(segment: &str, whole: &str) -> Result<Step> {
    match segment.find('[') {
        None => Ok(Step { name: segment.to_string(), predicate: None }),
        Some(open) => {
            if !segment.ends_with(']') {
                return Err(ConfcoreError::new(Category::Xml, format!("unterminated predicate in xpath: {whole}")));
            }
            let name = segment[..open].to_string();
            let predicate_body = &segment[open + 1..segment.len() - 1];
            let (key, value) = predicate_body
                .split_once('=')
                .ok_or_else(|| ConfcoreError::new(Category::Xml, format!("malformed predicate in xpath: {whole}")))?;
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            Ok(Step { name: name.to_string(), predicate: Some((key.trim().to_string(), value.to_string())) })
        }
    }
}

/// Evaluates `xpath` against `root`, returning every match as a path of
/// child indices from `root`. An empty result vector when `xpath` is the
/// root sentinel is never produced by this function directly — callers
/// handle [`XPath::is_root`] themselves since "select everything" marks
/// differently from a node-set match.
pub fn evaluate(root: &Node, xpath: &XPath) -> Vec<Vec<usize>> {
    let mut results = Vec::new();
    let mut path = Vec::new();
    walk(root, &xpath.steps, &mut path, &mut results);
    results
}

fn walk(node: &Node, steps: &[Step], path: &mut Vec<usize>, results: &mut Vec<Vec<usize>>) {
    let Some((step, rest)) = steps.split_first() else {
        results.push(path.clone());
        return;
    };
    for (index, child) in node.children.iter().enumerate() {
        if child.name != step.name {
            continue;
        }
        if let Some((key, value)) = &step.predicate {
            let satisfied = child
                .children
                .iter()
                .any(|c| &c.name == key && c.body.as_deref().map(str::trim) == Some(value.as_str()));
            if !satisfied {
                continue;
            }
        }
        path.push(index);
        walk(child, rest, path, results);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confcore_model::Node;

    fn sample_tree() -> Node {
        let mut e0 = Node::element("interface");
        e0.children.push(Node::leaf("name", "e0"));
        e0.children.push(Node::leaf("mtu", "1500"));
        let mut e1 = Node::element("interface");
        e1.children.push(Node::leaf("name", "e1"));
        e1.children.push(Node::leaf("mtu", "9000"));
        let mut interfaces = Node::config_root();
        interfaces.children.push(e0);
        interfaces.children.push(e1);
        interfaces
    }

    #[test]
    fn root_expression_is_the_select_everything_sentinel() {
        assert!(parse("/").unwrap().is_root());
        assert!(parse("").unwrap().is_root());
    }

    #[test]
    fn matches_child_step() {
        let tree = sample_tree();
        let xpath = parse("/interface").unwrap();
        let matches = evaluate(&tree, &xpath);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn predicate_narrows_to_one_entry() {
        let tree = sample_tree();
        let xpath = parse("/interface[name=\"e0\"]/mtu").unwrap();
        let matches = evaluate(&tree, &xpath);
        assert_eq!(matches, vec![vec![0, 1]]);
    }

    #[test]
    fn relative_expression_is_rejected() {
        assert!(parse("interface/mtu").is_err());
    }
}
