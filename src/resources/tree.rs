use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub value: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

fn key_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_i64() == Some(0) => None,
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Nests flat rows by `parent_key`. Rows whose parent is missing, null, 0,
/// empty or not in the list become roots. Sibling order follows input order.
pub fn build_tree(items: Vec<Value>, id_key: &str, parent_key: &str) -> Vec<TreeNode> {
    let ids: HashSet<String> = items.iter().filter_map(|item| key_of(item.get(id_key))).collect();

    let mut roots = Vec::new();
    let mut children: HashMap<String, Vec<Value>> = HashMap::new();
    for item in items {
        let parent = key_of(item.get(parent_key)).filter(|parent| ids.contains(parent));
        let own = key_of(item.get(id_key));
        match parent {
            // A row pointing at itself would never be reached
            Some(parent) if Some(&parent) != own.as_ref() => {
                children.entry(parent).or_default().push(item)
            }
            _ => roots.push(item),
        }
    }

    let mut visited = HashSet::new();
    roots
        .into_iter()
        .map(|item| attach(item, id_key, &mut children, &mut visited))
        .collect()
}

fn attach(
    item: Value,
    id_key: &str,
    children: &mut HashMap<String, Vec<Value>>,
    visited: &mut HashSet<String>,
) -> TreeNode {
    let kids = match key_of(item.get(id_key)) {
        Some(id) if visited.insert(id.clone()) => children.remove(&id).unwrap_or_default(),
        _ => Vec::new(),
    };

    TreeNode {
        value: item,
        children: kids
            .into_iter()
            .map(|child| attach(child, id_key, children, visited))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(nodes: &[TreeNode]) -> Vec<Value> {
        nodes.iter().map(|n| n.value["id"].clone()).collect()
    }

    #[test]
    fn test_nests_by_parent() {
        let items = vec![
            json!({"id": 1, "name": "System", "parent_id": 0}),
            json!({"id": 2, "name": "Users", "parent_id": 1}),
            json!({"id": 3, "name": "Roles", "parent_id": 1}),
            json!({"id": 4, "name": "Reports"}),
            json!({"id": 5, "name": "Daily", "parent_id": 4}),
        ];

        let tree = build_tree(items, "id", "parent_id");
        assert_eq!(ids(&tree), vec![json!(1), json!(4)]);
        assert_eq!(ids(&tree[0].children), vec![json!(2), json!(3)]);
        assert_eq!(ids(&tree[1].children), vec![json!(5)]);
    }

    #[test]
    fn test_orphans_and_empty_parents_are_roots() {
        let items = vec![
            json!({"id": "a", "parent": ""}),
            json!({"id": "b", "parent": "missing"}),
            json!({"id": "c", "parent": null}),
            json!({"id": "d", "parent": "a"}),
        ];

        let tree = build_tree(items, "id", "parent");
        assert_eq!(ids(&tree), vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(ids(&tree[0].children), vec![json!("d")]);
    }

    #[test]
    fn test_child_listed_before_parent() {
        let items = vec![json!({"id": 2, "pid": 1}), json!({"id": 1, "pid": 0})];
        let tree = build_tree(items, "id", "pid");
        assert_eq!(tree.len(), 1);
        assert_eq!(ids(&tree[0].children), vec![json!(2)]);
    }

    #[test]
    fn test_serializes_children_inline() {
        let tree = build_tree(vec![json!({"id": 1}), json!({"id": 2, "pid": 1})], "id", "pid");
        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value, json!([{"id": 1, "children": [{"id": 2, "pid": 1}]}]));
    }
}
