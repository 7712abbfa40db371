//! Protocol node view over frame values.
//!
//! A node is carried on the wire as the list `[tag, k1, v1, ..., kn, vn, content?]`.
//! Attributes are kept sorted so the same node always encodes to the same bytes.

use std::collections::BTreeMap;

use super::decoder::decode;
use super::encoder::encode;
use super::value::Value;
use crate::error::{EncodeError, ProtocolDecodeError};

/// Attributes of a node
pub type Attrs = BTreeMap<String, String>;

/// Node represents one protocol stanza.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// The tag name of the element
    pub tag: String,
    /// The attributes of the element
    pub attrs: Attrs,
    /// The content inside the element (nil, children, or bytes)
    pub content: NodeContent,
}

/// Content of a node
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeContent {
    #[default]
    None,
    /// Child nodes
    Children(Vec<Node>),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Node {
    /// Create a new node with the given tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            content: NodeContent::None,
        }
    }

    /// Builder-style attribute setter
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child
    pub fn child(mut self, child: Node) -> Self {
        self.add_child(child);
        self
    }

    /// Builder-style children
    pub fn children(mut self, children: Vec<Node>) -> Self {
        self.content = NodeContent::Children(children);
        self
    }

    /// Builder-style byte content
    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content = NodeContent::Bytes(bytes.into());
        self
    }

    /// Set an attribute on this node
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Get an attribute as string
    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Get an attribute parsed as an integer
    pub fn get_attr_int(&self, key: &str) -> Option<i64> {
        self.get_attr(key).and_then(|v| v.parse().ok())
    }

    /// Add a child node
    pub fn add_child(&mut self, child: Node) {
        match &mut self.content {
            NodeContent::Children(children) => children.push(child),
            _ => self.content = NodeContent::Children(vec![child]),
        }
    }

    /// Get children, empty when the content is not a child list
    pub fn get_children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Children(children) => children,
            _ => &[],
        }
    }

    /// Get children by tag
    pub fn get_children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.get_children().iter().filter(move |n| n.tag == tag)
    }

    /// Get first child with the given tag
    pub fn get_child_by_tag(&self, tag: &str) -> Option<&Node> {
        self.get_children().iter().find(|n| n.tag == tag)
    }

    /// Get an optional child by walking through nested tags
    pub fn get_optional_child_by_tag(&self, tags: &[&str]) -> Option<&Node> {
        let mut current = self;
        for tag in tags {
            current = current.get_child_by_tag(tag)?;
        }
        Some(current)
    }

    /// Get bytes content if present
    pub fn get_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Text content, when the byte content is valid UTF-8
    pub fn get_text(&self) -> Option<&str> {
        self.get_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Convert into the list form carried on the wire
    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(1 + self.attrs.len() * 2 + 1);
        items.push(Value::Str(self.tag.clone()));
        for (k, v) in &self.attrs {
            items.push(Value::Str(k.clone()));
            items.push(Value::Str(v.clone()));
        }
        match &self.content {
            NodeContent::None => {}
            NodeContent::Children(children) => {
                items.push(Value::List(children.iter().map(Node::to_value).collect()));
            }
            NodeContent::Bytes(bytes) => items.push(Value::Bytes(bytes.clone())),
        }
        Value::List(items)
    }

    /// Interpret a decoded list as a node.
    ///
    /// A string in the content slot is taken as byte content, since the
    /// decoder cannot tell text payloads from binary ones. An empty child
    /// list decodes as no content.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolDecodeError> {
        let items = value
            .as_list()
            .ok_or_else(|| ProtocolDecodeError::MalformedNode("node is not a list".into()))?;
        let (head, rest) = items
            .split_first()
            .ok_or_else(|| ProtocolDecodeError::MalformedNode("empty node".into()))?;
        let tag = head
            .as_str()
            .ok_or_else(|| ProtocolDecodeError::MalformedNode("tag is not a string".into()))?;

        let mut node = Node::new(tag);
        let attr_len = rest.len() - rest.len() % 2;
        for pair in rest[..attr_len].chunks_exact(2) {
            let key = pair[0]
                .as_str()
                .ok_or_else(|| ProtocolDecodeError::MalformedNode("attribute key is not a string".into()))?;
            let val = match &pair[1] {
                Value::Str(s) => s.clone(),
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                Value::Null => String::new(),
                _ => {
                    return Err(ProtocolDecodeError::MalformedNode(format!(
                        "attribute {key:?} is not a scalar"
                    )))
                }
            };
            node.attrs.insert(key.to_string(), val);
        }

        if let Some(content) = rest.get(attr_len) {
            node.content = match content {
                Value::Null => NodeContent::None,
                Value::List(children) => NodeContent::Children(
                    children.iter().map(Node::from_value).collect::<Result<_, _>>()?,
                ),
                Value::Str(s) => NodeContent::Bytes(s.as_bytes().to_vec()),
                Value::Bytes(b) => NodeContent::Bytes(b.clone()),
                _ => {
                    return Err(ProtocolDecodeError::MalformedNode(
                        "unsupported content value".into(),
                    ))
                }
            };
        }
        Ok(node)
    }
}

/// Encode a node into a frame
pub fn encode_node(node: &Node) -> Result<Vec<u8>, EncodeError> {
    encode(&node.to_value())
}

/// Decode a frame into a node. Trailing bytes after the first frame are ignored.
pub fn decode_node(data: &[u8]) -> Result<Node, ProtocolDecodeError> {
    let (value, _) = decode(data)?;
    Node::from_value(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let node = Node::new("message").attr("id", "123").attr("type", "text");

        assert_eq!(node.tag, "message");
        assert_eq!(node.get_attr("id"), Some("123"));
        assert_eq!(node.get_attr("type"), Some("text"));
        assert_eq!(node.get_attr("missing"), None);
    }

    #[test]
    fn test_node_children() {
        let mut parent = Node::new("iq");
        parent.add_child(Node::new("query"));
        parent.add_child(Node::new("result"));

        let children = parent.get_children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].tag, "query");
        assert_eq!(parent.get_child_by_tag("result").map(|n| n.tag.as_str()), Some("result"));
    }

    #[test]
    fn test_node_wire_roundtrip() {
        let node = Node::new("iq")
            .attr("type", "get")
            .attr("id", "1A2B")
            .attr("xmlns", "w:p")
            .child(Node::new("ping"))
            .child(Node::new("body").bytes(b"hello".to_vec()));

        let bytes = encode_node(&node).unwrap();
        let decoded = decode_node(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_attribute_order_does_not_change_bytes() {
        let a = Node::new("presence").attr("type", "available").attr("name", "me");
        let b = Node::new("presence").attr("name", "me").attr("type", "available");
        assert_eq!(encode_node(&a).unwrap(), encode_node(&b).unwrap());
    }

    #[test]
    fn test_binary_content_survives() {
        let node = Node::new("enc").bytes(vec![0x00, 0xff, 0x10]);
        let decoded = decode_node(&encode_node(&node).unwrap()).unwrap();
        assert_eq!(decoded.get_bytes(), Some(&[0x00, 0xff, 0x10][..]));
    }

    #[test]
    fn test_empty_children_decode_as_none() {
        let node = Node::new("chat").children(vec![]);
        let decoded = decode_node(&encode_node(&node).unwrap()).unwrap();
        assert_eq!(decoded.content, NodeContent::None);
    }

    #[test]
    fn test_rejects_non_node_values() {
        assert!(Node::from_value(&Value::Str("x".into())).is_err());
        assert!(Node::from_value(&Value::List(vec![Value::Bytes(vec![0xff])])).is_err());
    }
}
