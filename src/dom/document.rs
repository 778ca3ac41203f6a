// Arena-backed document tree.
//
// Nodes live in a Vec and are addressed by NodeId, which stays valid for the
// document's lifetime: removed or discarded nodes are detached, never freed,
// so an id can't be reused for a different node. Every insertion appends a
// MutationRecord, mirroring the childList records a browser would deliver.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::surface::{ContentSurface, OverlaySpec};
use crate::settings::BlurStrength;

/// Elements whose text is never visible content.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Prefix on every class the overlay markup uses.
pub const OVERLAY_CLASS_PREFIX: &str = "shroud-";

const WRAPPER_CLASS: &str = "shroud-wrapper";
const BLUR_CLASS: &str = "shroud-blur";
const BADGE_CLASS: &str = "shroud-badge";
const REVEAL_CLASS: &str = "shroud-reveal";
const CAPTURE_CLASS: &str = "shroud-capture";
const REVEALED_CLASS: &str = "shroud-revealed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.retain(|c| c != class);
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    /// True for markup the overlay manager itself created.
    pub fn is_overlay_chrome(&self) -> bool {
        self.classes.iter().any(|c| c.starts_with(OVERLAY_CLASS_PREFIX))
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One structural change: `added` nodes were inserted under `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
}

/// Serialisable description of a subtree, used to load documents from JSON
/// and to inject content in tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Text {
        text: String,
    },
    Element {
        tag: String,
        /// Space-separated class list, as in markup.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attrs: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<NodeSpec>,
    },
}

impl NodeSpec {
    pub fn text(text: &str) -> Self {
        NodeSpec::Text {
            text: text.to_string(),
        }
    }

    pub fn element(tag: &str) -> Self {
        NodeSpec::Element {
            tag: tag.to_string(),
            class: None,
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_class(mut self, name: &str) -> Self {
        if let NodeSpec::Element { class, .. } = &mut self {
            *class = Some(match class.take() {
                Some(existing) => format!("{existing} {name}"),
                None => name.to_string(),
            });
        }
        self
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        if let NodeSpec::Element { attrs, .. } = &mut self {
            attrs.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn with_child(mut self, child: NodeSpec) -> Self {
        if let NodeSpec::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_child(NodeSpec::text(text))
    }
}

/// On-disk document format: `{ "url": ..., "root": <NodeSpec> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSpec {
    pub url: String,
    pub root: NodeSpec,
}

/// Node ids making up one overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayParts {
    pub wrapper: NodeId,
    pub blur: NodeId,
    pub badge: NodeId,
    pub reveal: NodeId,
    pub capture: Option<NodeId>,
}

pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    url: String,
    mutations: Vec<MutationRecord>,
    overlays: HashMap<NodeId, OverlayParts>,
}

impl Document {
    /// An empty document with a `<body>` root.
    pub fn new(url: &str) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            url: url.to_string(),
            mutations: Vec::new(),
            overlays: HashMap::new(),
        };
        doc.root = doc.create_element("body");
        doc
    }

    /// Build a document from a spec. The initial tree produces no mutation
    /// records; the initial scan covers it.
    pub fn from_spec(spec: &DocumentSpec) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            url: spec.url.clone(),
            mutations: Vec::new(),
            overlays: HashMap::new(),
        };
        doc.root = doc.build(&spec.root);
        doc
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let spec: DocumentSpec =
            serde_json::from_str(json).context("Failed to parse document JSON")?;
        Ok(Self::from_spec(&spec))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(Element::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Create a detached subtree from a spec and return its root.
    fn build(&mut self, spec: &NodeSpec) -> NodeId {
        match spec {
            NodeSpec::Text { text } => self.create_text(text),
            NodeSpec::Element {
                tag,
                class,
                attrs,
                children,
            } => {
                let id = self.create_element(tag);
                if let Some(NodeData::Element(el)) = self.data_mut(id) {
                    if let Some(class) = class {
                        for name in class.split_whitespace() {
                            el.add_class(name);
                        }
                    }
                    for (key, value) in attrs {
                        el.set_attr(key, value);
                    }
                }
                for child in children {
                    let child_id = self.build(child);
                    self.link(id, child_id, None);
                }
                id
            }
        }
    }

    /// Build `spec` and append it under `parent` as a single insertion.
    pub fn insert_spec(&mut self, parent: NodeId, spec: &NodeSpec) -> Result<NodeId> {
        let id = self.build(spec);
        self.append_child(parent, id)?;
        Ok(id)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check(parent)?;
        self.check(child)?;
        if !matches!(self.nodes[parent.0].data, NodeData::Element(_)) {
            anyhow::bail!("Cannot append to text node {parent}");
        }
        if child == self.root || self.is_ancestor(child, parent) {
            anyhow::bail!("Appending {child} under {parent} would create a cycle");
        }
        self.detach(child);
        self.link(parent, child, None);
        self.mutations.push(MutationRecord {
            target: parent,
            added: vec![child],
        });
        Ok(())
    }

    /// Detach `id` from its parent. The node and its subtree stay addressable.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.check(id)?;
        if id == self.root {
            anyhow::bail!("Cannot remove the document root");
        }
        self.detach(id);
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        match self.data_mut(id) {
            Some(NodeData::Text(existing)) => {
                *existing = text.to_string();
                Ok(())
            }
            Some(NodeData::Element(_)) => anyhow::bail!("{id} is not a text node"),
            None => anyhow::bail!("Unknown node {id}"),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn overlay_of(&self, id: NodeId) -> Option<&OverlayParts> {
        self.overlays.get(&id)
    }

    /// Text of the badge drawn for a redacted node.
    pub fn badge_text(&self, id: NodeId) -> Option<String> {
        self.overlays.get(&id).map(|parts| self.raw_text(parts.badge))
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id.0 >= self.nodes.len() {
            anyhow::bail!("Unknown node {id}");
        }
        Ok(())
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0).map(|n| &mut n.data)
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match self.data_mut(id) {
            Some(NodeData::Element(el)) => Ok(el),
            _ => anyhow::bail!("{id} is not an element"),
        }
    }

    /// Attach `child` under `parent`, at `index` or at the end.
    fn link(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        match index {
            Some(i) if i <= children.len() => children.insert(i, child),
            _ => children.push(child),
        }
    }

    /// Remove `id` from its parent's child list. Returns the old position.
    fn detach(&mut self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.nodes[id.0].parent.take()?;
        let children = &mut self.nodes[parent.0].children;
        let index = children.iter().position(|c| *c == id)?;
        children.remove(index);
        Some((parent, index))
    }

    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.parent(id) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut Vec<String>) {
        match &self.nodes[id.0].data {
            NodeData::Text(text) => out.push(text.clone()),
            NodeData::Element(el) => {
                if HIDDEN_TAGS.contains(&el.tag.as_str()) {
                    return;
                }
                // Badge and buttons are chrome; the blur layer holds content.
                if el.is_overlay_chrome()
                    && !el.has_class(WRAPPER_CLASS)
                    && !el.has_class(BLUR_CLASS)
                {
                    return;
                }
                for child in &self.nodes[id.0].children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// All text under `id`, chrome included.
    fn raw_text(&self, id: NodeId) -> String {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            match &self.nodes[next.0].data {
                NodeData::Text(text) => out.push(text.clone()),
                NodeData::Element(_) => {
                    stack.extend(self.nodes[next.0].children.iter().rev().copied())
                }
            }
        }
        out.join(" ")
    }

    fn new_chrome(&mut self, tag: &str, classes: &[&str], text: Option<&str>) -> NodeId {
        let id = self.create_element(tag);
        if let NodeData::Element(el) = &mut self.nodes[id.0].data {
            for class in classes {
                el.add_class(class);
            }
        }
        if let Some(text) = text {
            let text_id = self.create_text(text);
            self.link(id, text_id, None);
        }
        id
    }

    fn set_button_label(&mut self, button: NodeId, label: &str) {
        let text_node = self.nodes[button.0].children.first().copied();
        match text_node {
            Some(text_id) => {
                if let NodeData::Text(existing) = &mut self.nodes[text_id.0].data {
                    *existing = label.to_string();
                }
            }
            None => {
                let text_id = self.create_text(label);
                self.link(button, text_id, None);
            }
        }
    }

    fn parts(&self, id: NodeId) -> Result<OverlayParts> {
        self.overlays
            .get(&id)
            .cloned()
            .with_context(|| format!("{id} has no overlay"))
    }
}

impl ContentSurface for Document {
    fn root(&self) -> NodeId {
        self.root
    }

    fn page_url(&self) -> &str {
        &self.url
    }

    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if id.0 >= self.nodes.len() {
            return out;
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = &self.nodes[next.0];
            if matches!(node.data, NodeData::Element(_)) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        match self.nodes.get(id.0).map(|n| &n.data) {
            Some(NodeData::Element(el)) => Some(el),
            _ => None,
        }
    }

    fn text(&self, id: NodeId) -> String {
        if id.0 >= self.nodes.len() {
            return String::new();
        }
        let mut out = Vec::new();
        self.collect_text(id, &mut out);
        out.join(" ")
    }

    fn is_attached(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len() && self.is_ancestor(self.root, id)
    }

    fn is_overlaid(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(next) = current {
            if let Some(el) = self.element(next) {
                if el.is_overlay_chrome() {
                    return true;
                }
            }
            current = self.parent(next);
        }
        false
    }

    fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }

    fn wrap_with_overlay(&mut self, id: NodeId, spec: &OverlaySpec) -> Result<()> {
        self.check(id)?;
        if self.overlays.contains_key(&id) {
            anyhow::bail!("{id} is already wrapped");
        }
        let parent = self
            .parent(id)
            .with_context(|| format!("{id} is detached and cannot be wrapped"))?;

        let wrapper = self.new_chrome("div", &[WRAPPER_CLASS], None);
        let blur_class = spec.blur.css_class();
        let blur = self.new_chrome("div", &[BLUR_CLASS, &blur_class], None);
        let badge = self.new_chrome("div", &[BADGE_CLASS], Some(&spec.badge_text()));
        let reveal = self.new_chrome("button", &[REVEAL_CLASS], Some("Show"));
        let capture = spec
            .evidence_control
            .then(|| self.new_chrome("button", &[CAPTURE_CLASS], Some("Save evidence")));

        {
            let el = self.element_mut(wrapper)?;
            el.set_attr("data-shroud-node", &id.0.to_string());
            el.set_attr("data-shroud-state", "blurred");
        }
        {
            let el = self.element_mut(badge)?;
            el.set_attr("data-severity", spec.severity.as_str());
            el.set_attr("role", "status");
        }
        self.element_mut(blur)?
            .set_attr("style", &format!("filter: blur({}px)", spec.blur.radius_px()));

        // Swap the wrapper into the node's slot, then move the node itself
        // into the blur layer. The node keeps its identity.
        let (parent, index) = self.detach(id).unwrap_or((parent, usize::MAX));
        self.link(parent, wrapper, Some(index));
        self.link(wrapper, blur, None);
        self.link(blur, id, None);
        self.link(wrapper, badge, None);
        self.link(wrapper, reveal, None);
        if let Some(capture) = capture {
            self.link(wrapper, capture, None);
        }

        self.overlays.insert(
            id,
            OverlayParts {
                wrapper,
                blur,
                badge,
                reveal,
                capture,
            },
        );
        self.mutations.push(MutationRecord {
            target: parent,
            added: vec![wrapper],
        });
        Ok(())
    }

    fn set_revealed(&mut self, id: NodeId, revealed: bool) -> Result<()> {
        let parts = self.parts(id)?;
        {
            let wrapper = self.element_mut(parts.wrapper)?;
            if revealed {
                wrapper.add_class(REVEALED_CLASS);
            } else {
                wrapper.remove_class(REVEALED_CLASS);
            }
            wrapper.set_attr(
                "data-shroud-state",
                if revealed { "revealed" } else { "blurred" },
            );
        }
        self.set_button_label(parts.reveal, if revealed { "Hide" } else { "Show" });
        Ok(())
    }

    fn set_blur_strength(&mut self, id: NodeId, blur: BlurStrength) -> Result<()> {
        let parts = self.parts(id)?;
        let el = self.element_mut(parts.blur)?;
        el.classes.retain(|c| !c.starts_with("shroud-blur-"));
        el.add_class(&blur.css_class());
        el.set_attr("style", &format!("filter: blur({}px)", blur.radius_px()));
        Ok(())
    }

    fn disable_capture(&mut self, id: NodeId) -> Result<()> {
        let capture = self
            .parts(id)?
            .capture
            .with_context(|| format!("{id} has no evidence control"))?;
        self.element_mut(capture)?.set_attr("disabled", "true");
        self.set_button_label(capture, "Evidence saved");
        Ok(())
    }

    fn unwrap_overlay(&mut self, id: NodeId) -> Result<()> {
        let parts = self
            .overlays
            .remove(&id)
            .with_context(|| format!("{id} has no overlay"))?;
        self.detach(id);
        if let Some((parent, index)) = self.detach(parts.wrapper) {
            self.link(parent, id, Some(index));
            self.mutations.push(MutationRecord {
                target: parent,
                added: vec![id],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toxicity::traits::Severity;

    fn spec() -> OverlaySpec {
        OverlaySpec {
            category_label: "Threat".into(),
            severity: Severity::High,
            confidence_percent: 82,
            blur: BlurStrength::Medium,
            evidence_control: true,
        }
    }

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new("https://example.test/thread");
        let list = doc
            .insert_spec(doc.root(), &NodeSpec::element("ul").with_class("comments"))
            .unwrap();
        let first = doc
            .insert_spec(list, &NodeSpec::element("li").with_text("first comment here"))
            .unwrap();
        doc.insert_spec(list, &NodeSpec::element("li").with_text("second comment here"))
            .unwrap();
        doc.take_mutations();
        (doc, list, first)
    }

    #[test]
    fn json_round_trip_builds_tree_without_mutations() {
        let json = r#"{
            "url": "https://example.test/",
            "root": {"tag": "body", "children": [
                {"tag": "p", "class": "post body", "children": [{"text": "hello there"}]},
                {"tag": "script", "children": [{"text": "var x = 1;"}]}
            ]}
        }"#;
        let mut doc = Document::from_json(json).unwrap();
        assert_eq!(doc.page_url(), "https://example.test/");
        assert!(doc.take_mutations().is_empty());
        let p = doc.children(doc.root())[0];
        assert!(doc.element(p).unwrap().has_class("post"));
        assert_eq!(doc.text(doc.root()).trim(), "hello there");
    }

    #[test]
    fn insertion_records_one_mutation() {
        let (mut doc, list, _) = sample();
        let added = doc
            .insert_spec(
                list,
                &NodeSpec::element("li").with_child(NodeSpec::element("p").with_text("nested")),
            )
            .unwrap();
        let records = doc.take_mutations();
        assert_eq!(
            records,
            vec![MutationRecord {
                target: list,
                added: vec![added]
            }]
        );
        assert!(doc.take_mutations().is_empty());
    }

    #[test]
    fn wrap_moves_node_into_blur_layer_in_place() {
        let (mut doc, list, first) = sample();
        doc.wrap_with_overlay(first, &spec()).unwrap();

        let parts = doc.overlay_of(first).unwrap().clone();
        assert_eq!(doc.children(list)[0], parts.wrapper);
        assert_eq!(doc.parent(first), Some(parts.blur));
        assert!(doc.is_overlaid(first));
        assert!(doc.is_attached(first));
        assert_eq!(doc.badge_text(first).unwrap(), "Threat · High · 82%");
        // Chrome text never leaks into content text.
        assert_eq!(doc.text(parts.wrapper).trim(), "first comment here");
        assert!(doc.wrap_with_overlay(first, &spec()).is_err());
    }

    #[test]
    fn unwrap_restores_original_position() {
        let (mut doc, list, first) = sample();
        doc.wrap_with_overlay(first, &spec()).unwrap();
        let wrapper = doc.overlay_of(first).unwrap().wrapper;
        doc.unwrap_overlay(first).unwrap();

        assert_eq!(doc.children(list)[0], first);
        assert_eq!(doc.parent(first), Some(list));
        assert!(!doc.is_attached(wrapper));
        assert!(!doc.is_overlaid(first));
        assert!(doc.overlay_of(first).is_none());
    }

    #[test]
    fn reveal_and_capture_update_chrome() {
        let (mut doc, _, first) = sample();
        doc.wrap_with_overlay(first, &spec()).unwrap();
        let parts = doc.overlay_of(first).unwrap().clone();

        doc.set_revealed(first, true).unwrap();
        let wrapper = doc.element(parts.wrapper).unwrap();
        assert!(wrapper.has_class("shroud-revealed"));
        assert_eq!(wrapper.attr("data-shroud-state"), Some("revealed"));

        doc.disable_capture(first).unwrap();
        let capture = parts.capture.unwrap();
        assert_eq!(doc.element(capture).unwrap().attr("disabled"), Some("true"));

        doc.set_blur_strength(first, BlurStrength::Heavy).unwrap();
        let blur = doc.element(parts.blur).unwrap();
        assert!(blur.has_class("shroud-blur-heavy"));
        assert!(!blur.has_class("shroud-blur-medium"));
    }

    #[test]
    fn cycles_are_rejected() {
        let (mut doc, list, first) = sample();
        assert!(doc.append_child(first, list).is_err());
        let root = doc.root();
        assert!(doc.append_child(list, root).is_err());
    }
}
