//! On-disk (de)serialization for the datastore's `xml`/`json` formats
//! (spec.md §4.7 "load path"/"persist"). `Node`'s tag name is itself
//! data, not a struct field known at compile time, so XML goes through
//! a hand-rolled event walk rather than quick-xml's serde integration;
//! JSON round-trips directly through `Node`'s own `Serialize`/`Deserialize`.

use confcore_contracts::{Category, ConfcoreError, Result};
use confcore_model::Node;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

pub fn read_xml(input: &str) -> Result<Node> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = vec![Node::element("__root__")];
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))?;
        match event {
            Event::Start(start) => stack.push(node_from_start(&start)?),
            Event::Empty(start) => {
                let node = node_from_start(&start)?;
                top(&mut stack)?.children.push(node);
            }
            Event::End(_) => {
                let finished = stack.pop().ok_or_else(|| ConfcoreError::new(Category::Xml, "unbalanced end tag"))?;
                top(&mut stack)?.children.push(finished);
            }
            Event::Text(text) => {
                let decoded =
                    text.unescape().map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))?;
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    let node = top(&mut stack)?;
                    node.body = Some(match node.body.take() {
                        Some(existing) => existing + trimmed,
                        None => trimmed.to_string(),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut root = stack.pop().ok_or_else(|| ConfcoreError::new(Category::Xml, "empty document"))?;
    if root.children.len() != 1 {
        return Err(ConfcoreError::new(
            Category::Xml,
            format!("expected exactly one top-level element, found {}", root.children.len()),
        ));
    }
    Ok(root.children.remove(0))
}

fn top(stack: &mut [Node]) -> Result<&mut Node> {
    stack.last_mut().ok_or_else(|| ConfcoreError::new(Category::Xml, "unbalanced end tag"))
}

fn node_from_start(start: &BytesStart) -> Result<Node> {
    let name =
        String::from_utf8(start.name().as_ref().to_vec()).map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))?;
    let mut node = Node::element(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))?;
        let value = attr.unescape_value().map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))?;
        node.set_attribute(key, value.into_owned());
    }
    Ok(node)
}

pub fn write_xml(root: &Node, pretty: bool) -> Result<String> {
    let mut buf = Vec::new();
    if pretty {
        let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);
        write_node(&mut writer, root)?;
    } else {
        let mut writer = Writer::new(&mut buf);
        write_node(&mut writer, root)?;
    }
    String::from_utf8(buf).map_err(|e| ConfcoreError::new(Category::Xml, e.to_string()))
}

fn write_node<W: std::io::Write>(writer: &mut Writer<W>, node: &Node) -> Result<()> {
    let mut start = BytesStart::new(node.name.as_str());
    for attr in &node.attributes {
        start.push_attribute((attr.name.as_str(), attr.value.as_str()));
    }

    if node.children.is_empty() && node.body.is_none() {
        writer.write_event(Event::Empty(start)).map_err(xml_err)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    if let Some(body) = &node.body {
        writer.write_event(Event::Text(BytesText::new(body))).map_err(xml_err)?;
    }
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(node.name.as_str()))).map_err(xml_err)?;
    Ok(())
}

fn xml_err(e: quick_xml::Error) -> ConfcoreError {
    ConfcoreError::new(Category::Xml, e.to_string())
}

pub fn read_json(input: &str) -> Result<Node> {
    serde_json::from_str(input).map_err(ConfcoreError::from)
}

pub fn write_json(root: &Node, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(root).map_err(ConfcoreError::from)
    } else {
        serde_json::to_string(root).map_err(ConfcoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_round_trip_preserves_attributes_and_body() {
        let mut root = Node::config_root();
        let mut iface = Node::element("interface");
        iface.set_attribute("operation", "merge");
        iface.children.push(Node::leaf("name", "e0"));
        iface.children.push(Node::leaf("mtu", "1500"));
        root.children.push(iface);

        let xml = write_xml(&root, false).unwrap();
        let parsed = read_xml(&xml).unwrap();

        assert_eq!(parsed.name, "config");
        assert_eq!(parsed.children[0].attribute("operation"), Some("merge"));
        assert_eq!(parsed.children[0].children[1].body.as_deref(), Some("1500"));
    }

    #[test]
    fn xml_write_escapes_reserved_characters() {
        let mut root = Node::config_root();
        root.children.push(Node::leaf("description", "a < b & c"));
        let xml = write_xml(&root, false).unwrap();
        assert!(xml.contains("&lt;"));
        assert!(xml.contains("&amp;"));

        let parsed = read_xml(&xml).unwrap();
        assert_eq!(parsed.children[0].body.as_deref(), Some("a < b & c"));
    }

    #[test]
    fn xml_rejects_multiple_top_level_elements() {
        let malformed = "<config/><config/>";
        assert!(read_xml(malformed).is_err());
    }

    #[test]
    fn json_round_trip_preserves_tree_shape() {
        let mut root = Node::config_root();
        root.children.push(Node::leaf("hostname", "r1"));

        let json = write_json(&root, true).unwrap();
        let parsed: Node = read_json(&json).unwrap();

        assert_eq!(parsed.name, "config");
        assert_eq!(parsed.children[0].body.as_deref(), Some("r1"));
    }
}
