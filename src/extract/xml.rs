// src/extract/xml.rs

use roxmltree::{Document, Node};
use tracing::{debug, instrument, trace};

use super::{parse_total, to_value, ExtractError, Field, ParsedPage, Record};

/// Parse one XML response: every element named `item` becomes a record,
/// and `total_element` (if given) is read as the upstream total count.
#[instrument(level = "debug", skip(body, fields), fields(body_len = body.len()))]
pub fn parse_page(
    body: &str,
    item: &str,
    fields: &[Field],
    total_element: Option<&str>,
) -> Result<ParsedPage, ExtractError> {
    let doc = Document::parse(body).map_err(|e| ExtractError::Document(e.to_string()))?;

    let total_count = match total_element {
        Some(name) => {
            let node = find_element(doc.root(), name)
                .ok_or_else(|| ExtractError::MissingTotal(name.to_string()))?;
            let total = parse_total(name, &text_of(node))?;
            trace!(total, "parsed total count");
            Some(total)
        }
        None => None,
    };

    let items: Vec<_> = doc
        .descendants()
        .filter(|n| is_named(n, item))
        .enumerate()
        .map(|(idx, node)| extract_item(node, fields, idx))
        .collect();

    debug!(items = items.len(), "parsed xml page");
    Ok(ParsedPage { items, total_count })
}

fn extract_item(node: Node<'_, '_>, fields: &[Field], idx: usize) -> Result<Record, ExtractError> {
    let mut record = Record::new();
    for field in fields {
        // descendants() yields the node itself first
        let el = node
            .descendants()
            .skip(1)
            .find(|n| is_named(n, &field.name))
            .ok_or_else(|| ExtractError::MissingField {
                field: field.name.clone(),
                item: idx,
            })?;
        let value = to_value(&field.name, text_of(el), field.numeric, idx)?;
        record.push(field.name.clone(), value);
    }
    Ok(record)
}

fn find_element<'a, 'input>(root: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    root.descendants().find(|n| is_named(n, name))
}

fn is_named(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// All text below `node`, concatenated as-is.
fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}
