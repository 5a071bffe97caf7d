//! `imsmanifest.xml` parsing
//!
//! Authoring tools disagree about namespace prefixes (`imsss:objectives`,
//! `adlseq:objectives`, plain `objectives`, sometimes with the prefix never
//! declared). The document is therefore read into a small prefix-preserving
//! element tree, and every lookup tries an ordered list of candidate names
//! (bare name first, then each known prefix) instead of relying on namespace
//! resolution.

use std::collections::HashSet;
use std::io::{Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::ZipArchive;

use crate::error::{ManifestError, PackageError};
use crate::security::manifest_entry_name;
use crate::version::ScormVersion;

/// Prefixes tried, in order, after the bare name.
const KNOWN_PREFIXES: &[&str] = &["imsss:", "adlseq:", "adlcp:", "imscp:", "imsmd:", "lom:"];

const DEFAULT_ENTRY_POINT: &str = "index.html";
const UNTITLED: &str = "Untitled Course";

/// Structured package descriptor. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub identifier: Option<String>,
    pub version: ScormVersion,
    pub title: String,
    pub entry_point: String,
    pub default_organization: Option<String>,
    pub organizations: Vec<Organization>,
    pub resources: Vec<Resource>,
    /// Flattened across every organization, item and the global
    /// sequencing collection; first occurrence of an id wins.
    pub objectives: Vec<ManifestObjective>,
    /// First `masteryscore` found in document order.
    pub mastery_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub identifier: String,
    pub title: Option<String>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub identifier: String,
    pub identifierref: Option<String>,
    pub title: Option<String>,
    pub mastery_score: Option<f64>,
    pub children: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub identifier: String,
    pub resource_type: Option<String>,
    pub scorm_type: Option<String>,
    pub href: Option<String>,
    pub files: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestObjective {
    pub id: String,
    pub primary: bool,
    pub satisfied_by_measure: bool,
    pub min_normalized_measure: f64,
}

impl PackageManifest {
    /// Parse raw manifest text.
    pub fn parse(xml: &str) -> Result<Self, ManifestError> {
        let root = XmlNode::parse_document(xml)?;
        if !root.is_named("manifest") {
            return Err(ManifestError::MissingRoot);
        }

        let version = root
            .child("metadata")
            .and_then(|m| m.child("schemaversion"))
            .map(|n| n.text.as_str())
            .filter(|v| !v.is_empty())
            .or_else(|| root.attr("version"))
            .map(ScormVersion::detect)
            .unwrap_or(ScormVersion::Scorm12);

        let organizations_node = root.child("organizations");
        let organizations: Vec<Organization> = organizations_node
            .map(|orgs| orgs.children_named("organization"))
            .unwrap_or_default()
            .into_iter()
            .map(parse_organization)
            .collect();

        let resources: Vec<Resource> = root
            .child("resources")
            .map(|r| r.children_named("resource"))
            .unwrap_or_default()
            .into_iter()
            .map(parse_resource)
            .collect();

        let entry_point = resources
            .iter()
            .find_map(|r| r.href.clone())
            .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string());

        let title = organizations
            .first()
            .and_then(|o| o.title.clone())
            .or_else(|| lom_description(&root))
            .unwrap_or_else(|| UNTITLED.to_string());

        let mut objectives = ObjectiveCollector::default();
        for org in organizations_node
            .map(|orgs| orgs.children_named("organization"))
            .unwrap_or_default()
        {
            collect_item_objectives(org, &mut objectives);
        }
        for collection in root.children_named("sequencingCollection") {
            for sequencing in collection.children_named("sequencing") {
                objectives.collect_sequencing(sequencing);
            }
        }

        let mastery_score = organizations
            .iter()
            .flat_map(|o| o.items.iter())
            .find_map(first_mastery_score);

        let manifest = Self {
            identifier: root.attr("identifier").map(str::to_string),
            version,
            title,
            entry_point,
            default_organization: organizations_node
                .and_then(|o| o.attr("default"))
                .map(str::to_string),
            organizations,
            resources,
            objectives: objectives.into_vec(),
            mastery_score,
        };

        debug!(
            version = %manifest.version,
            title = %manifest.title,
            objectives = manifest.objectives.len(),
            "Parsed manifest"
        );
        Ok(manifest)
    }

    /// Read and parse `imsmanifest.xml` from a package archive.
    pub fn from_archive<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Self, PackageError> {
        let name = manifest_entry_name(archive).ok_or(ManifestError::NotFound)?;
        let mut file = archive.by_name(&name)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes))?)
    }

    /// Pass threshold implied by the first primary objective that is
    /// satisfied by measure.
    pub fn scaled_passing_score(&self) -> Option<f64> {
        self.objectives
            .iter()
            .find(|o| o.primary && o.satisfied_by_measure)
            .map(|o| o.min_normalized_measure)
    }
}

fn parse_organization(node: &XmlNode) -> Organization {
    Organization {
        identifier: node.attr("identifier").unwrap_or_default().to_string(),
        title: node.child_text("title"),
        items: node.children_named("item").into_iter().map(parse_item).collect(),
    }
}

fn parse_item(node: &XmlNode) -> Item {
    Item {
        identifier: node.attr("identifier").unwrap_or_default().to_string(),
        identifierref: node.attr("identifierref").map(str::to_string),
        title: node.child_text("title"),
        mastery_score: node
            .child_text("masteryscore")
            .and_then(|s| s.trim().parse().ok()),
        children: node.children_named("item").into_iter().map(parse_item).collect(),
    }
}

fn parse_resource(node: &XmlNode) -> Resource {
    Resource {
        identifier: node.attr("identifier").unwrap_or_default().to_string(),
        resource_type: node.attr("type").map(str::to_string),
        scorm_type: node
            .attr("scormType")
            .or_else(|| node.attr("scormtype"))
            .map(str::to_string),
        href: node.attr("href").filter(|h| !h.is_empty()).map(str::to_string),
        files: node
            .children_named("file")
            .into_iter()
            .filter_map(|f| f.attr("href").map(str::to_string))
            .collect(),
        dependencies: node
            .children_named("dependency")
            .into_iter()
            .filter_map(|d| d.attr("identifierref").map(str::to_string))
            .collect(),
    }
}

fn first_mastery_score(item: &Item) -> Option<f64> {
    item.mastery_score
        .or_else(|| item.children.iter().find_map(first_mastery_score))
}

fn lom_description(root: &XmlNode) -> Option<String> {
    let description = root
        .child("metadata")?
        .child("lom")?
        .child("general")?
        .child("description")?;
    description
        .child_text("string")
        .or_else(|| description.child_text("langstring"))
        .or_else(|| Some(description.text.clone()).filter(|t| !t.is_empty()))
}

fn collect_item_objectives(node: &XmlNode, collector: &mut ObjectiveCollector) {
    for item in node.children_named("item") {
        for sequencing in item.children_named("sequencing") {
            collector.collect_sequencing(sequencing);
        }
        collect_item_objectives(item, collector);
    }
}

#[derive(Default)]
struct ObjectiveCollector {
    seen: HashSet<String>,
    objectives: Vec<ManifestObjective>,
}

impl ObjectiveCollector {
    fn collect_sequencing(&mut self, sequencing: &XmlNode) {
        for block in sequencing.children_named("objectives") {
            for primary in block.children_named("primaryObjective") {
                self.push(primary, true);
            }
            for secondary in block.children_named("objective") {
                self.push(secondary, false);
            }
        }
    }

    fn push(&mut self, node: &XmlNode, primary: bool) {
        let Some(id) = node.attr("objectiveID").filter(|id| !id.is_empty()) else {
            return;
        };
        if !self.seen.insert(id.to_string()) {
            return;
        }
        self.objectives.push(ManifestObjective {
            id: id.to_string(),
            primary,
            satisfied_by_measure: node
                .attr("satisfiedByMeasure")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            min_normalized_measure: node
                .child_text("minNormalizedMeasure")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0.0),
        });
    }

    fn into_vec(self) -> Vec<ManifestObjective> {
        self.objectives
    }
}

/// Prefix-preserving XML element.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

fn candidates(local: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(local.to_string()).chain(KNOWN_PREFIXES.iter().map(move |p| format!("{p}{local}")))
}

impl XmlNode {
    fn parse_document(xml: &str) -> Result<XmlNode, ManifestError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ManifestError::Malformed(format!("{e} at byte {}", reader.buffer_position())))?;
            match event {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let node = Self::from_start(&start)?;
                    Self::attach(&mut stack, &mut root, node);
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| ManifestError::Malformed("unexpected closing tag".into()))?;
                    Self::attach(&mut stack, &mut root, node);
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ManifestError::Malformed(e.to_string()))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(ManifestError::Malformed(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or(ManifestError::MissingRoot)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<XmlNode, ManifestError> {
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ManifestError::Malformed(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| ManifestError::Malformed(e.to_string()))?;
            attrs.push((String::from_utf8_lossy(attr.key.as_ref()).into_owned(), value.into_owned()));
        }
        Ok(XmlNode {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            ..Default::default()
        })
    }

    fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => {
                if root.is_none() {
                    *root = Some(node);
                }
            }
        }
    }

    fn is_named(&self, local: &str) -> bool {
        candidates(local).any(|c| c == self.name)
    }

    /// First child matching the earliest candidate name.
    fn child(&self, local: &str) -> Option<&XmlNode> {
        candidates(local).find_map(|name| self.children.iter().find(|c| c.name == name))
    }

    /// Every child matching any candidate, grouped in candidate order.
    fn children_named(&self, local: &str) -> Vec<&XmlNode> {
        candidates(local)
            .flat_map(|name| self.children.iter().filter(move |c| c.name == name))
            .collect()
    }

    fn child_text(&self, local: &str) -> Option<String> {
        self.child(local)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn attr(&self, local: &str) -> Option<&str> {
        candidates(local).find_map(|name| {
            self.attrs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        })
    }
}
