//! Catalog document codec
//!
//! Reads the `<repositories>` layout and the legacy `<layman>` layout, and
//! writes the `<repositories>` layout. Output is stable: the same set of
//! definitions always serializes to the same bytes.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::definition::{OverlayDefinition, Owner, Source, DEFAULT_PRIORITY};
use crate::error::CatalogError;

/// Catalog format version written to the root element
pub const CATALOG_VERSION: &str = "1.0";

/// Minimal element tree built from the event stream
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Parse a catalog document into its overlay definitions, in document order
pub fn parse_document(text: &str, origin: &str) -> Result<Vec<OverlayDefinition>, CatalogError> {
    let root = parse_tree(text, origin)?;

    if root.name != "repositories" && root.name != "layman" {
        return Err(CatalogError::parse(
            origin,
            format!("unexpected root element <{}>", root.name),
        ));
    }

    let mut definitions = Vec::new();
    for element in &root.children {
        let definition = match element.name.as_str() {
            "repo" => repo_definition(element),
            "overlay" if element.attr("name").is_some() => legacy_definition(element),
            "overlay" => repo_definition(element),
            _ => continue,
        }
        .map_err(|message| CatalogError::parse(origin, message))?;

        definition
            .validate()
            .map_err(|message| CatalogError::parse(origin, message))?;
        definitions.push(definition);
    }

    Ok(definitions)
}

fn parse_tree(text: &str, origin: &str) -> Result<Element, CatalogError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open_element(&start, origin)?),
            Ok(Event::Empty(start)) => {
                let element = open_element(&start, origin)?;
                attach(&mut stack, &mut root, element, origin)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| CatalogError::parse(origin, "unbalanced closing tag"))?;
                attach(&mut stack, &mut root, element, origin)?;
            }
            Ok(Event::Text(text)) => {
                if let Some(current) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| CatalogError::parse(origin, e.to_string()))?;
                    current.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(CatalogError::parse(origin, e.to_string())),
        }
    }

    if let Some(open) = stack.last() {
        return Err(CatalogError::parse(
            origin,
            format!("element <{}> is never closed", open.name),
        ));
    }

    root.ok_or_else(|| CatalogError::parse(origin, "document has no root element"))
}

fn open_element(start: &BytesStart, origin: &str) -> Result<Element, CatalogError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| CatalogError::parse(origin, e.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| CatalogError::parse(origin, e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Default::default()
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    origin: &str,
) -> Result<(), CatalogError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }

    if root.is_some() {
        return Err(CatalogError::parse(origin, "multiple root elements"));
    }
    *root = Some(element);
    Ok(())
}

fn parse_priority(value: Option<String>, name: &str) -> Result<i32, String> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("overlay '{name}' has a non-numeric priority '{raw}'")),
        None => Ok(DEFAULT_PRIORITY),
    }
}

fn repo_definition(element: &Element) -> Result<OverlayDefinition, String> {
    let name = element.child_text("name").unwrap_or_default();

    let priority = parse_priority(
        element
            .attr("priority")
            .map(str::to_string)
            .or_else(|| element.child_text("priority")),
        &name,
    )?;

    let quality = element
        .attr("quality")
        .map(str::parse)
        .transpose()
        .map_err(|e| format!("overlay '{name}': {e}"))?
        .unwrap_or_default();
    let status = element
        .attr("status")
        .map(str::parse)
        .transpose()
        .map_err(|e| format!("overlay '{name}': {e}"))?
        .unwrap_or_default();

    let descriptions = element
        .children_named("description")
        .map(|d| d.text.trim().to_string())
        .collect();

    let owner = match element.child("owner") {
        Some(owner) => Owner {
            name: owner.child_text("name"),
            email: owner.child_text("email").unwrap_or_default(),
        },
        None => Owner {
            name: None,
            email: String::new(),
        },
    };

    let sources = element
        .children_named("source")
        .map(|s| Source {
            uri: s.text.trim().to_string(),
            source_type: s.attr("type").unwrap_or_default().to_string(),
            branch: s.attr("branch").map(str::to_string),
        })
        .collect();

    let feeds = element
        .children_named("feed")
        .map(|f| f.text.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    Ok(OverlayDefinition {
        name,
        priority,
        quality,
        status,
        descriptions,
        owner,
        sources,
        feeds,
        homepage: element.child_text("homepage"),
        irc: element.child_text("irc"),
    })
}

/// `<overlay name=".." type=".." src=".." contact="..">` entries
fn legacy_definition(element: &Element) -> Result<OverlayDefinition, String> {
    let name = element.attr("name").unwrap_or_default().to_string();

    let priority = parse_priority(element.attr("priority").map(str::to_string), &name)?;
    let quality = element
        .attr("quality")
        .map(str::parse)
        .transpose()
        .map_err(|e| format!("overlay '{name}': {e}"))?
        .unwrap_or_default();
    let status = element
        .attr("status")
        .map(str::parse)
        .transpose()
        .map_err(|e| format!("overlay '{name}': {e}"))?
        .unwrap_or_default();

    let mut sources = Vec::new();
    if let Some(uri) = element.attr("src") {
        sources.push(Source {
            uri: uri.to_string(),
            source_type: element.attr("type").unwrap_or_default().to_string(),
            branch: element.attr("branch").map(str::to_string),
        });
    }

    Ok(OverlayDefinition {
        descriptions: element
            .children_named("description")
            .map(|d| d.text.trim().to_string())
            .collect(),
        owner: Owner {
            name: None,
            email: element.attr("contact").unwrap_or_default().to_string(),
        },
        homepage: element.child_text("link"),
        name,
        priority,
        quality,
        status,
        sources,
        feeds: Vec::new(),
        irc: None,
    })
}

/// Serialize definitions as a `<repositories>` document
pub fn write_document<'a>(definitions: impl IntoIterator<Item = &'a OverlayDefinition>) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!("<repositories version=\"{CATALOG_VERSION}\">\n"));

    for def in definitions {
        out.push_str(&format!(
            "  <repo priority=\"{}\" quality=\"{}\" status=\"{}\">\n",
            def.priority, def.quality, def.status
        ));
        push_text_element(&mut out, 4, "name", &def.name);
        for description in &def.descriptions {
            push_text_element(&mut out, 4, "description", description);
        }
        if let Some(homepage) = &def.homepage {
            push_text_element(&mut out, 4, "homepage", homepage);
        }

        out.push_str("    <owner>\n");
        push_text_element(&mut out, 6, "email", &def.owner.email);
        if let Some(name) = &def.owner.name {
            push_text_element(&mut out, 6, "name", name);
        }
        out.push_str("    </owner>\n");

        for source in &def.sources {
            match &source.branch {
                Some(branch) => out.push_str(&format!(
                    "    <source type=\"{}\" branch=\"{}\">{}</source>\n",
                    escape(source.source_type.as_str()),
                    escape(branch.as_str()),
                    escape(source.uri.as_str())
                )),
                None => out.push_str(&format!(
                    "    <source type=\"{}\">{}</source>\n",
                    escape(source.source_type.as_str()),
                    escape(source.uri.as_str())
                )),
            }
        }
        for feed in &def.feeds {
            push_text_element(&mut out, 4, "feed", feed);
        }
        if let Some(irc) = &def.irc {
            push_text_element(&mut out, 4, "irc", irc);
        }
        out.push_str("  </repo>\n");
    }

    out.push_str("</repositories>\n");
    out
}

fn push_text_element(out: &mut String, indent: usize, tag: &str, text: &str) {
    out.push_str(&" ".repeat(indent));
    out.push_str(&format!("<{tag}>{}</{tag}>\n", escape(text)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Quality, Status};

    const CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE repositories SYSTEM "http://www.gentoo.org/dtd/repositories.dtd">
<repositories xmlns="" version="1.0">
  <repo quality="experimental" status="official" priority="10">
    <name>wrobel</name>
    <description>Test</description>
    <owner>
      <email>nobody@gentoo.org</email>
    </owner>
    <source type="Subversion">https://overlays.gentoo.org/svn/dev/wrobel</source>
  </repo>
</repositories>
"#;

    #[test]
    fn test_parse_repositories_layout() {
        let defs = parse_document(CATALOG, "test").unwrap();
        assert_eq!(defs.len(), 1);

        let wrobel = &defs[0];
        assert_eq!(wrobel.name, "wrobel");
        assert_eq!(wrobel.priority, 10);
        assert_eq!(wrobel.quality, Quality::Experimental);
        assert_eq!(wrobel.status, Status::Official);
        assert_eq!(wrobel.descriptions, vec!["Test"]);
        assert_eq!(wrobel.owner.email, "nobody@gentoo.org");
        assert_eq!(wrobel.owner.name, None);
        assert_eq!(wrobel.sources[0].source_type, "Subversion");
        assert_eq!(wrobel.sources[0].branch, None);
    }

    #[test]
    fn test_priority_defaults_when_absent() {
        let xml = CATALOG.replace(" priority=\"10\"", "");
        let defs = parse_document(&xml, "test").unwrap();
        assert_eq!(defs[0].priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_priority_child_element() {
        let xml = CATALOG
            .replace(" priority=\"10\"", "")
            .replace("<name>wrobel</name>", "<name>wrobel</name><priority>7</priority>");
        let defs = parse_document(&xml, "test").unwrap();
        assert_eq!(defs[0].priority, 7);
    }

    #[test]
    fn test_unknown_quality_is_parse_error() {
        let xml = CATALOG.replace("experimental", "bleeding");
        let err = parse_document(&xml, "test").unwrap_err();
        assert!(err.to_string().contains("unknown quality"));
    }

    #[test]
    fn test_missing_owner_is_parse_error() {
        let xml = CATALOG.replace("<email>nobody@gentoo.org</email>", "");
        let err = parse_document(&xml, "test").unwrap_err();
        assert!(err.to_string().contains("no owner email"));
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse_document("<repositories><repo></repositories>", "broken").unwrap_err();
        assert!(matches!(err, CatalogError::Parse { ref origin, .. } if origin == "broken"));
    }

    #[test]
    fn test_unexpected_root_is_parse_error() {
        let err = parse_document("<catalog/>", "test").unwrap_err();
        assert!(err.to_string().contains("unexpected root"));
    }

    #[test]
    fn test_legacy_layout() {
        let xml = r#"<?xml version="1.0"?>
<layman>
  <overlay name="wrobel" type="Subversion" priority="10" status="official"
           src="https://overlays.gentoo.org/svn/dev/wrobel"
           contact="nobody@gentoo.org">
    <link>https://example.org/wrobel</link>
    <description>Test</description>
  </overlay>
</layman>
"#;
        let defs = parse_document(xml, "legacy").unwrap();
        assert_eq!(defs[0].name, "wrobel");
        assert_eq!(defs[0].priority, 10);
        assert_eq!(defs[0].homepage.as_deref(), Some("https://example.org/wrobel"));
        assert_eq!(defs[0].sources[0].uri, "https://overlays.gentoo.org/svn/dev/wrobel");
    }

    #[test]
    fn test_write_escapes_text() {
        let mut defs = parse_document(CATALOG, "test").unwrap();
        defs[0].descriptions = vec!["Fish & <chips>".to_string()];

        let written = write_document(&defs);
        assert!(written.contains("<description>Fish &amp; &lt;chips&gt;</description>"));

        let reparsed = parse_document(&written, "written").unwrap();
        assert_eq!(reparsed, defs);
    }

    #[test]
    fn test_write_is_stable() {
        let defs = parse_document(CATALOG, "test").unwrap();
        assert_eq!(write_document(&defs), write_document(&defs));
    }
}
