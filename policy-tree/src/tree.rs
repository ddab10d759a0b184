use serde_yaml::Value;

use crate::path::{NodePath, Segment};

/// Lookup helpers over a parsed document tree.
pub trait TreeExt {
    /// Return the value stored under a string key, if this is a mapping.
    fn child(&self, key: &str) -> Option<&Value>;

    /// Return a child's string value.
    fn child_str(&self, key: &str) -> Option<&str>;

    /// Walk a [`NodePath`] and return the addressed node.
    fn resolve(&self, path: &NodePath) -> Option<&Value>;

    /// Document-order sort key for a path.
    ///
    /// Each segment becomes the position of that key within its mapping (in
    /// written order) or the sequence index. Segments that do not resolve sort
    /// after every existing sibling.
    fn position_of(&self, path: &NodePath) -> Vec<usize>;

    /// Short name of the node type, for messages.
    fn kind(&self) -> &'static str;

    /// String keys of a mapping, in written order.
    fn key_names(&self) -> Vec<&str>;
}

impl TreeExt for Value {
    fn child(&self, key: &str) -> Option<&Value> {
        self.as_mapping()?.get(key)
    }

    fn child_str(&self, key: &str) -> Option<&str> {
        self.child(key)?.as_str()
    }

    fn resolve(&self, path: &NodePath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match segment {
                Segment::Key(key) => current.child(key)?,
                Segment::Index(idx) => current.as_sequence()?.get(*idx)?,
            };
        }
        Some(current)
    }

    fn position_of(&self, path: &NodePath) -> Vec<usize> {
        let mut out = Vec::with_capacity(path.segments().len());
        let mut current = Some(self);
        for segment in path.segments() {
            let (position, next) = match (segment, current) {
                (Segment::Key(key), Some(Value::Mapping(map))) => map
                    .iter()
                    .position(|(k, _)| k.as_str() == Some(key.as_str()))
                    .map_or((usize::MAX, None), |pos| (pos, map.get(key.as_str()))),
                (Segment::Index(idx), Some(Value::Sequence(seq))) => (*idx, seq.get(*idx)),
                (Segment::Index(idx), _) => (*idx, None),
                (Segment::Key(_), _) => (usize::MAX, None),
            };
            out.push(position);
            current = next;
        }
        out
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Tagged(_) => "tagged value",
        }
    }

    fn key_names(&self) -> Vec<&str> {
        self.as_mapping()
            .map(|map| map.keys().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::TreeExt;
    use crate::{parse, NodePath};

    #[test]
    fn resolve_walks_keys_and_indices() {
        let tree = parse(b"spec:\n  ingress:\n    - toPorts:\n        - ports: []\n").expect("parse");
        let path = NodePath::root().key("spec").key("ingress").index(0).key("toPorts");
        assert_eq!(tree.resolve(&path).map(|v| v.kind()), Some("sequence"));
    }

    #[test]
    fn positions_follow_written_key_order() {
        let tree = parse(b"egress: []\ningress: []\n").expect("parse");
        let ingress = tree.position_of(&NodePath::root().key("ingress"));
        let egress = tree.position_of(&NodePath::root().key("egress"));
        assert!(egress < ingress);
    }

    #[test]
    fn missing_keys_sort_last() {
        let tree = parse(b"ingress: []\n").expect("parse");
        let missing = tree.position_of(&NodePath::root().key("endpointSelector"));
        let present = tree.position_of(&NodePath::root().key("ingress"));
        assert!(present < missing);
    }
}
