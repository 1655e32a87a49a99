//! XForm schema trees
//!
//! Parses an ODK XForm into an addressable structure:
//! - Fields are the leaf elements of the primary instance
//! - Types and required flags come from `<bind>` elements
//! - Select options come from `<item><value>` entries in the body

mod field;

pub use field::{FieldType, SchemaField};

use crate::error::{MigrationError, Result};
use crate::xml::{Namespaces, NodeId, XmlTree, XFORM_NAMESPACES};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Instance elements that carry submission metadata rather than answers
pub const EXCLUDED_ELEMENTS: &[&str] = &["formhub", "meta", "deviceid"];

/// Check whether an element name is one of the metadata containers
pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_ELEMENTS.contains(&name)
}

/// A parsed XForm definition
#[derive(Debug, Clone)]
pub struct SchemaTree {
    doc: XmlTree,
    instance_root: NodeId,
    fields: Vec<SchemaField>,
}

impl SchemaTree {
    /// Parse an XForm using the standard XForm namespace table
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, &XFORM_NAMESPACES)
    }

    /// Parse an XForm with an explicit namespace table
    pub fn parse_with(text: &str, namespaces: &Namespaces) -> Result<Self> {
        let doc = XmlTree::parse(text, namespaces)?;
        let instance_root = locate_instance_root(&doc)?;
        let fields = collect_fields(&doc, instance_root);

        Ok(Self {
            doc,
            instance_root,
            fields,
        })
    }

    /// The underlying document
    pub fn doc(&self) -> &XmlTree {
        &self.doc
    }

    /// Tag of the primary instance root
    pub fn root_name(&self) -> &str {
        self.doc.name(self.instance_root)
    }

    /// Form id: the instance root's `id` attribute, falling back to its tag
    pub fn form_id(&self) -> &str {
        self.doc
            .attribute(self.instance_root, "id")
            .unwrap_or_else(|| self.root_name())
    }

    /// Text of `<h:head><h:title>`, empty when absent
    pub fn title(&self) -> &str {
        self.doc
            .find_local_path(self.doc.root(), &["head", "title"])
            .map(|id| self.doc.text(id))
            .unwrap_or("")
    }

    /// All data fields in document order
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Result<&SchemaField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| MigrationError::missing(name))
    }

    pub fn field_type(&self, name: &str) -> Result<&FieldType> {
        Ok(&self.field(name)?.field_type)
    }

    pub fn is_required(&self, name: &str) -> Result<bool> {
        Ok(self.field(name)?.required)
    }

    pub fn options(&self, name: &str) -> Result<&[String]> {
        Ok(&self.field(name)?.options)
    }

    pub fn group_path(&self, name: &str) -> Result<&[String]> {
        Ok(&self.field(name)?.group_path)
    }

    /// Field name to enclosing group names, outermost first
    pub fn fields_groups(&self) -> BTreeMap<String, Vec<String>> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.group_path.clone()))
            .collect()
    }

    /// Align the root tag and form id with another revision of the form.
    ///
    /// The root tag, and every absolute `/root/...` path found in attribute
    /// values (binds, body refs, calculations), follow `root_name`. The `id`
    /// attribute becomes `form_id`. Both are passed separately because forms
    /// like `<data id="household">` use a generic root tag.
    pub fn align_with(&mut self, root_name: &str, form_id: &str) {
        let old_root = self.root_name().to_string();
        let root = self.instance_root;

        if old_root != root_name {
            let old_prefix = format!("/{}/", old_root);
            let new_prefix = format!("/{}/", root_name);
            let old_exact = format!("/{}", old_root);

            let nodes: Vec<NodeId> = std::iter::once(self.doc.root())
                .chain(self.doc.tree().descendants(self.doc.root()))
                .collect();
            for id in nodes {
                for (_, value) in self.doc.tree_mut().data_mut(id).attributes.iter_mut() {
                    if value.contains(&old_prefix) {
                        *value = value.replace(&old_prefix, &new_prefix);
                    } else if *value == old_exact {
                        *value = format!("/{}", root_name);
                    }
                }
            }
            self.doc.tree_mut().set_label(root, root_name);
        }

        if self.form_id() != form_id {
            self.doc.set_attribute(root, "id", form_id);
        }
    }

    /// Whether root tag and form id already match
    pub fn is_aligned_with(&self, root_name: &str, form_id: &str) -> bool {
        self.root_name() == root_name && self.form_id() == form_id
    }

    /// Serialize the (possibly renamed) document
    pub fn to_xml(&self) -> Result<String> {
        self.doc.to_xml()
    }
}

fn locate_instance_root(doc: &XmlTree) -> Result<NodeId> {
    let instance = doc
        .find_local_path(doc.root(), &["head", "model", "instance"])
        .ok_or_else(|| {
            MigrationError::MalformedDocument("missing <head><model><instance> section".into())
        })?;

    doc.children(instance)
        .first()
        .copied()
        .ok_or_else(|| MigrationError::MalformedDocument("instance has no root element".into()))
}

/// Last segment of an absolute nodeset/ref path
fn path_leaf(path: &str) -> &str {
    path.trim().rsplit('/').next().unwrap_or("")
}

fn collect_fields(doc: &XmlTree, instance_root: NodeId) -> Vec<SchemaField> {
    let binds = collect_binds(doc);
    let options = collect_options(doc);

    let mut fields = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<(NodeId, Vec<String>)> = doc
        .children(instance_root)
        .iter()
        .rev()
        .map(|&c| (c, Vec::new()))
        .collect();

    while let Some((id, groups)) = stack.pop() {
        let name = doc.name(id);
        if is_excluded(name) {
            continue;
        }

        let children = doc.children(id);
        if !children.is_empty() {
            let mut inner = groups.clone();
            inner.push(name.to_string());
            stack.extend(children.iter().rev().map(|&c| (c, inner.clone())));
            continue;
        }

        if !seen.insert(name.to_string()) {
            tracing::warn!("Duplicate field '{}' in schema; keeping first occurrence", name);
            continue;
        }

        let (field_type, required) = binds.get(name).cloned().unwrap_or_default();
        let field_options = if field_type.is_select() {
            options.get(name).cloned().unwrap_or_default()
        } else {
            Vec::new()
        };

        fields.push(SchemaField {
            name: name.to_string(),
            field_type,
            required,
            options: field_options,
            group_path: groups,
        });
    }

    fields
}

fn collect_binds(doc: &XmlTree) -> HashMap<String, (FieldType, bool)> {
    let mut binds = HashMap::new();
    let Some(model) = doc.find_local_path(doc.root(), &["head", "model"]) else {
        return binds;
    };

    for &bind in doc.children(model) {
        if doc.local_name(bind) != "bind" {
            continue;
        }
        let Some(nodeset) = doc.attribute(bind, "nodeset") else {
            continue;
        };
        let field_type = doc
            .attribute(bind, "type")
            .map(FieldType::from_bind)
            .unwrap_or_default();
        let required = doc
            .attribute(bind, "required")
            .map(|r| matches!(r.trim().to_ascii_lowercase().as_str(), "true()" | "true"))
            .unwrap_or(false);
        binds.insert(path_leaf(nodeset).to_string(), (field_type, required));
    }

    binds
}

fn collect_options(doc: &XmlTree) -> HashMap<String, Vec<String>> {
    let mut options = HashMap::new();
    let Some(body) = doc.find_local(doc.root(), "body") else {
        return options;
    };

    for control in doc.tree().descendants(body) {
        if !matches!(doc.local_name(control), "select" | "select1") {
            continue;
        }
        let Some(reference) = doc
            .attribute(control, "ref")
            .or_else(|| doc.attribute(control, "nodeset"))
        else {
            continue;
        };

        let values: Vec<String> = doc
            .children(control)
            .iter()
            .filter(|&&item| doc.local_name(item) == "item")
            .filter_map(|&item| doc.find_local(item, "value"))
            .map(|value| doc.text(value).to_string())
            .collect();
        options.insert(path_leaf(reference).to_string(), values);
    }

    options
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Original survey: name, gender, photo, date, location, age
    pub const SURVEY: &str = r#"<?xml version="1.0"?>
<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml" xmlns:jr="http://openrosa.org/javarosa">
  <h:head>
    <h:title>Survey</h:title>
    <model>
      <instance>
        <Survey id="Survey">
          <name/>
          <gender/>
          <photo/>
          <date/>
          <location/>
          <age/>
          <meta>
            <instanceID/>
          </meta>
        </Survey>
      </instance>
      <bind nodeset="/Survey/name" type="string" required="true()"/>
      <bind nodeset="/Survey/gender" type="select1" required="true()"/>
      <bind nodeset="/Survey/photo" type="binary"/>
      <bind nodeset="/Survey/date" type="date"/>
      <bind nodeset="/Survey/location" type="geopoint" required="true()"/>
      <bind nodeset="/Survey/age" type="int" constraint=". &lt; 150"/>
      <bind nodeset="/Survey/meta/instanceID" type="string" readonly="true()" calculate="concat('uuid:', uuid())"/>
    </model>
  </h:head>
  <h:body>
    <input ref="/Survey/name"><label>Name</label></input>
    <select1 ref="/Survey/gender">
      <label>Gender</label>
      <item><label>Male</label><value>male</value></item>
      <item><label>Female</label><value>female</value></item>
    </select1>
    <upload mediatype="image/*" ref="/Survey/photo"><label>Photo</label></upload>
    <input ref="/Survey/date"><label>Date</label></input>
    <input ref="/Survey/location"><label>Location</label></input>
    <input ref="/Survey/age"><label>Age</label></input>
  </h:body>
</h:html>"#;

    /// Evolved survey: first_name, last_name, birthday, gender, photo, age, location
    pub const SURVEY2: &str = r#"<?xml version="1.0"?>
<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml" xmlns:jr="http://openrosa.org/javarosa">
  <h:head>
    <h:title>Survey2</h:title>
    <model>
      <instance>
        <Survey2 id="Survey2">
          <first_name/>
          <last_name/>
          <birthday/>
          <gender/>
          <photo/>
          <age/>
          <location/>
          <meta>
            <instanceID/>
          </meta>
        </Survey2>
      </instance>
      <bind nodeset="/Survey2/first_name" type="string" required="true()"/>
      <bind nodeset="/Survey2/last_name" type="string"/>
      <bind nodeset="/Survey2/birthday" type="date"/>
      <bind nodeset="/Survey2/gender" type="select1" required="true()"/>
      <bind nodeset="/Survey2/photo" type="binary"/>
      <bind nodeset="/Survey2/age" type="decimal"/>
      <bind nodeset="/Survey2/location" type="geopoint"/>
      <bind nodeset="/Survey2/meta/instanceID" type="string" readonly="true()" calculate="concat('uuid:', uuid())"/>
    </model>
  </h:head>
  <h:body>
    <input ref="/Survey2/first_name"><label>First name</label></input>
    <input ref="/Survey2/last_name"><label>Last name</label></input>
    <input ref="/Survey2/birthday"><label>Birthday</label></input>
    <select1 ref="/Survey2/gender">
      <label>Gender</label>
      <item><label>Male</label><value>male</value></item>
      <item><label>Female</label><value>female</value></item>
      <item><label>Unknown</label><value>unknown</value></item>
    </select1>
    <upload mediatype="image/*" ref="/Survey2/photo"><label>Photo</label></upload>
    <input ref="/Survey2/age"><label>Age</label></input>
    <input ref="/Survey2/location"><label>Location</label></input>
  </h:body>
</h:html>"#;

    /// An answer to [`SURVEY`]
    pub const SURVEY_ANSWER: &str = r#"<Survey id="Survey">
  <name>Alonzo Church</name>
  <gender>male</gender>
  <photo>church.jpg</photo>
  <date>2000-01-01</date>
  <location>40.35 -74.66 0 0</location>
  <age>50</age>
  <meta>
    <instanceID>uuid:0d5a2b3c-1111-4222-8333-944455556666</instanceID>
  </meta>
</Survey>"#;

    /// Build a minimal form whose instance is `instance` (already nested XML)
    pub fn form(root: &str, instance: &str, binds: &str) -> String {
        format!(
            r#"<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml">
  <h:head>
    <h:title>{root}</h:title>
    <model>
      <instance><{root} id="{root}">{instance}<meta><instanceID/></meta></{root}></instance>
      {binds}
    </model>
  </h:head>
  <h:body/>
</h:html>"#
        )
    }
}
