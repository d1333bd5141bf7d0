// src/extract/html.rs

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use super::{parse_total, to_value, ExtractError, Field, ParsedPage, Record};

/// Parse one HTML page: each match of `item` becomes a record.
///
/// Field text is whitespace-collapsed, the way a browser would render it.
/// A field with `join` set concatenates every non-empty match; otherwise the
/// first match wins.
#[instrument(level = "debug", skip_all, fields(body_len = body.len()))]
pub fn parse_page(
    body: &str,
    item: &Selector,
    fields: &[Field],
    total: Option<(&str, &Selector)>,
) -> Result<ParsedPage, ExtractError> {
    let doc = Html::parse_document(body);

    let total_count = match total {
        Some((name, sel)) => {
            let el = doc
                .select(sel)
                .next()
                .ok_or_else(|| ExtractError::MissingTotal(name.to_string()))?;
            Some(parse_total(name, &collapsed_text(el))?)
        }
        None => None,
    };

    let items: Vec<_> = doc
        .select(item)
        .enumerate()
        .map(|(idx, el)| extract_item(el, fields, idx))
        .collect();

    debug!(items = items.len(), "parsed html page");
    Ok(ParsedPage { items, total_count })
}

fn extract_item(el: ElementRef<'_>, fields: &[Field], idx: usize) -> Result<Record, ExtractError> {
    let mut record = Record::new();
    for field in fields {
        let missing = || ExtractError::MissingField {
            field: field.name.clone(),
            item: idx,
        };
        let sel = field.selector.as_ref().ok_or_else(missing)?;
        let raw = match &field.join {
            Some(sep) => {
                let parts: Vec<String> = matches(el, sel)
                    .map(collapsed_text)
                    .filter(|t| !t.is_empty())
                    .collect();
                if parts.is_empty() {
                    return Err(missing());
                }
                parts.join(sep)
            }
            None => matches(el, sel)
                .next()
                .map(collapsed_text)
                .ok_or_else(missing)?,
        };
        record.push(field.name.clone(), to_value(&field.name, raw, field.numeric, idx)?);
    }
    Ok(record)
}

/// Matches strictly below `el`; the item itself never counts as its own field.
fn matches<'a, 'b>(el: ElementRef<'a>, sel: &'b Selector) -> impl Iterator<Item = ElementRef<'a>> + 'b
where
    'a: 'b,
{
    let id = el.id();
    el.select(sel).filter(move |m| m.id() != id)
}

fn collapsed_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Value;

    const NUTRITION_PAGE: &str = r#"<html><body>
      <h1>강황</h1>
      <div class="nutrition_facts international">
        <div class="serving_size">1회 제공량   100 g</div>
        <div class="nutrient">열량 <span>312</span> kcal</div>
        <div class="nutrient">탄수화물 <span>67.14</span> g</div>
        <div class="empty">   </div>
      </div>
      <p class="count">Showing <b>1</b> of <b> 15 </b></p>
    </body></html>"#;

    fn field(name: &str, css: &str, join: Option<&str>) -> Field {
        Field {
            name: name.into(),
            numeric: false,
            selector: Some(Selector::parse(css).unwrap()),
            join: join.map(str::to_string),
        }
    }

    #[test]
    fn extracts_first_match_and_joined_matches() {
        let item = Selector::parse("div.nutrition_facts.international").unwrap();
        let fields = vec![
            field("serving", "div.serving_size", None),
            field("facts", "div", Some(" | ")),
        ];
        let page = parse_page(NUTRITION_PAGE, &item, &fields, None).unwrap();
        assert_eq!(page.items.len(), 1);
        let rec = page.items[0].as_ref().unwrap();
        assert_eq!(
            rec.get("serving"),
            Some(&Value::Text("1회 제공량 100 g".into()))
        );
        assert_eq!(
            rec.get("facts"),
            Some(&Value::Text(
                "1회 제공량 100 g | 열량 312 kcal | 탄수화물 67.14 g".into()
            ))
        );
    }

    #[test]
    fn total_count_from_selector() {
        let item = Selector::parse("div.nutrition_facts").unwrap();
        let total = Selector::parse("p.count b:nth-of-type(2)").unwrap();
        let page = parse_page(NUTRITION_PAGE, &item, &[], Some(("count", &total))).unwrap();
        assert_eq!(page.total_count, Some(15));
    }

    #[test]
    fn no_matching_item_yields_no_records() {
        let item = Selector::parse("td.borderBottom").unwrap();
        let page = parse_page(NUTRITION_PAGE, &item, &[], None).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn missing_field_selector_match() {
        let item = Selector::parse("div.nutrition_facts").unwrap();
        let fields = vec![field("title", "a.prominent", None)];
        let page = parse_page(NUTRITION_PAGE, &item, &fields, None).unwrap();
        assert_eq!(
            page.items[0].clone().unwrap_err(),
            ExtractError::MissingField {
                field: "title".into(),
                item: 0
            }
        );
    }
}
