//! Pull-parsing of RPC replies against a compiled path tree.
//!
//! A running element stack reconstructs the current xpath; end tags resolve
//! to tag leaves, field leaves or loop parents. Emission happens at the
//! parent's end tag, which guarantees each row is complete before it turns
//! into a measurement. The parser is iterative, so arbitrarily deep device
//! output cannot blow the stack.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::measure::{SeriesGrouper, Value};

use super::tree::{FieldKind, PathTree};

struct BoundTag {
    short_name: String,
    value: String,
    /// Path of the element the key lives on; used for scope checks.
    elem_path: String,
}

/// Parse one RPC reply, adding completed rows to the grouper.
///
/// Malformed XML stops the scan at the offending token; rows emitted before
/// that point are kept.
pub fn parse_reply(
    tree: &PathTree,
    measurement: &str,
    device: &str,
    timestamp: i64,
    xml: &str,
    grouper: &mut SeriesGrouper,
) {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut chardata = String::new();

    // Visitation state, keyed by leaf xpath. Tag order is bind order so
    // emitted measurements keep deterministic tag ordering.
    let mut bound_tags: HashMap<String, BoundTag> = HashMap::new();
    let mut tag_order: Vec<String> = Vec::new();
    let mut field_values: HashMap<String, Value> = HashMap::new();

    loop {
        match reader.read_event() {
            Err(e) => {
                warn!(error = %e, "malformed XML in rpc reply");
                return;
            }
            Ok(Event::Eof) => return,
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Empty(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                handle_end_tag(
                    tree,
                    measurement,
                    device,
                    timestamp,
                    &stack,
                    &chardata,
                    &mut bound_tags,
                    &mut tag_order,
                    &mut field_values,
                    grouper,
                );
                stack.pop();
            }
            Ok(Event::End(_)) => {
                handle_end_tag(
                    tree,
                    measurement,
                    device,
                    timestamp,
                    &stack,
                    &chardata,
                    &mut bound_tags,
                    &mut tag_order,
                    &mut field_values,
                    grouper,
                );
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                chardata = t
                    .unescape()
                    .map(|s| s.replace('\n', ""))
                    .unwrap_or_default();
            }
            Ok(_) => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_end_tag(
    tree: &PathTree,
    measurement: &str,
    device: &str,
    timestamp: i64,
    stack: &[String],
    chardata: &str,
    bound_tags: &mut HashMap<String, BoundTag>,
    tag_order: &mut Vec<String>,
    field_values: &mut HashMap<String, Value>,
    grouper: &mut SeriesGrouper,
) {
    let xpath = join_stack(stack);

    if let Some(leaf) = tree.tags.get(&xpath) {
        if !bound_tags.contains_key(&xpath) {
            tag_order.push(xpath.clone());
        }
        bound_tags.insert(
            xpath.clone(),
            BoundTag {
                short_name: leaf.short_name.clone(),
                value: chardata.to_string(),
                elem_path: leaf.elem_path.clone(),
            },
        );
    }

    if let Some(leaf) = tree.fields.get(&xpath) {
        field_values.insert(xpath.clone(), coerce(leaf.kind, chardata));
    }

    let Some(children) = tree.parents.get(&xpath) else {
        return;
    };

    // End of a loop scope: emit every visited child field, then reset the
    // visitation state under this parent. Tags bound above the parent stay.
    for child in children {
        let Some(value) = field_values.get(child) else {
            continue;
        };
        let Some(leaf) = tree.fields.get(child) else {
            continue;
        };

        let ancestors: Vec<&BoundTag> = tag_order
            .iter()
            .filter_map(|path| bound_tags.get(path))
            .filter(|tag| is_ancestor(&tag.elem_path, child))
            .collect();

        if ancestors.len() < leaf.tag_length {
            continue;
        }

        let mut tags: Vec<(String, String)> =
            vec![("device".to_string(), device.to_string())];
        for tag in ancestors {
            tags.push((tag.short_name.clone(), tag.value.clone()));
        }

        grouper.add(
            measurement,
            &tags,
            timestamp,
            leaf.short_name.clone(),
            value.clone(),
        );
    }

    for child in children {
        field_values.remove(child);
    }
    tag_order.retain(|path| {
        if is_ancestor(&xpath, path) {
            bound_tags.remove(path);
            false
        } else {
            true
        }
    });
}

fn join_stack(stack: &[String]) -> String {
    let mut s = String::new();
    for elem in stack {
        s.push('/');
        s.push_str(elem);
    }
    s
}

/// True when a key bound on `elem_path` is in scope for `field_path`.
fn is_ancestor(elem_path: &str, field_path: &str) -> bool {
    field_path.len() > elem_path.len()
        && field_path.starts_with(elem_path)
        && field_path.as_bytes()[elem_path.len()] == b'/'
}

/// Coerce character data per the declared type; conversion failures fall
/// back to the raw string.
fn coerce(kind: FieldKind, raw: &str) -> Value {
    let trimmed = raw.trim();
    match kind {
        FieldKind::Int => trimmed
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldKind::Float => trimmed
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldKind::Epoch => parse_epoch(trimmed)
            .map(Value::Int)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        FieldKind::Str => Value::String(raw.to_string()),
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS TZ` into Unix nanoseconds. Zone
/// abbreviations are not portably resolvable; the naive time is taken as
/// UTC.
fn parse_epoch(raw: &str) -> Option<i64> {
    let datetime = match raw.rsplit_once(' ') {
        Some((head, zone)) if zone.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => raw,
    };
    let naive = NaiveDateTime::parse_from_str(datetime, "%Y-%m-%d %H:%M:%S").ok()?;
    naive.and_utc().timestamp_nanos_opt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netconf::tree::PathTree;

    const REPLY: &str = r#"
        <rpc-reply>
          <interface-information>
            <physical-interface>
              <ifname>ge-0/0/0</ifname>
              <speed>1000mbps</speed>
              <traffic-statistics>
                <input-packets>100</input-packets>
                <output-packets>200</output-packets>
              </traffic-statistics>
            </physical-interface>
            <physical-interface>
              <ifname>ge-0/0/1</ifname>
              <speed>10Gbps</speed>
              <traffic-statistics>
                <input-packets>300</input-packets>
                <output-packets>400</output-packets>
              </traffic-statistics>
            </physical-interface>
          </interface-information>
        </rpc-reply>"#;

    fn if_tree() -> PathTree {
        PathTree::compile(&[
            "/rpc-reply/interface-information/physical-interface[ifname]/speed:string"
                .to_string(),
            "/rpc-reply/interface-information/physical-interface[ifname]/traffic-statistics/input-packets:int"
                .to_string(),
            "/rpc-reply/interface-information/physical-interface[ifname]/traffic-statistics/output-packets:int"
                .to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_reply_emits_one_row_per_interface() {
        let mut grouper = SeriesGrouper::new();
        parse_reply(&if_tree(), "ifcounters", "r1", 42, REPLY, &mut grouper);

        let out = grouper.into_measurements();
        assert_eq!(out.len(), 2);

        let first = &out[0];
        assert_eq!(first.name(), "ifcounters");
        assert_eq!(first.get_tag("device"), Some("r1"));
        assert_eq!(first.get_tag("ifname"), Some("ge-0/0/0"));
        assert_eq!(first.get_field("speed"), Some(&Value::String("1000mbps".into())));
        assert_eq!(first.get_field("input-packets"), Some(&Value::Int(100)));
        assert_eq!(first.get_field("output-packets"), Some(&Value::Int(200)));
        assert_eq!(first.timestamp(), 42);

        let second = &out[1];
        assert_eq!(second.get_tag("ifname"), Some("ge-0/0/1"));
        assert_eq!(second.get_field("input-packets"), Some(&Value::Int(300)));
    }

    #[test]
    fn test_row_missing_field_emits_the_rest() {
        let reply = r#"
            <rpc-reply>
              <interface-information>
                <physical-interface>
                  <ifname>ge-0/0/0</ifname>
                  <speed>1000mbps</speed>
                </physical-interface>
              </interface-information>
            </rpc-reply>"#;

        let mut grouper = SeriesGrouper::new();
        parse_reply(&if_tree(), "ifcounters", "r1", 0, reply, &mut grouper);

        let out = grouper.into_measurements();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_field("speed"), Some(&Value::String("1000mbps".into())));
        assert_eq!(out[0].get_field("input-packets"), None);
    }

    #[test]
    fn test_field_without_loop_key() {
        let tree = PathTree::compile(&[
            "/rpc-reply/system-information/serial-number:string".to_string(),
        ])
        .unwrap();

        let reply = r#"
            <rpc-reply>
              <system-information>
                <serial-number>JN12345</serial-number>
              </system-information>
            </rpc-reply>"#;

        let mut grouper = SeriesGrouper::new();
        parse_reply(&tree, "sysinfo", "r1", 0, reply, &mut grouper);

        let out = grouper.into_measurements();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].get_field("serial-number"),
            Some(&Value::String("JN12345".into()))
        );
        assert_eq!(out[0].tag_list().len(), 1); // device only
    }

    #[test]
    fn test_int_conversion_error_keeps_string() {
        let tree = PathTree::compile(&[
            "/rpc-reply/a[k]/v:int".to_string(),
        ])
        .unwrap();

        let reply = "<rpc-reply><a><k>one</k><v>not-a-number</v></a></rpc-reply>";

        let mut grouper = SeriesGrouper::new();
        parse_reply(&tree, "m", "r1", 0, reply, &mut grouper);

        let out = grouper.into_measurements();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].get_field("v"),
            Some(&Value::String("not-a-number".into()))
        );
    }

    #[test]
    fn test_coerce_types() {
        assert_eq!(coerce(FieldKind::Int, "42"), Value::Int(42));
        assert_eq!(coerce(FieldKind::Float, "1.5"), Value::Float(1.5));
        assert_eq!(
            coerce(FieldKind::Str, "hello"),
            Value::String("hello".into())
        );
    }

    #[test]
    fn test_epoch_parsing() {
        let parsed = parse_epoch("2024-03-01 12:00:00 UTC").expect("epoch");
        assert_eq!(parsed, 1_709_294_400_000_000_000);

        // Without a zone suffix.
        assert!(parse_epoch("2024-03-01 12:00:00").is_some());

        // Garbage falls back to the string path.
        assert_eq!(
            coerce(FieldKind::Epoch, "yesterday"),
            Value::String("yesterday".into())
        );
    }

    #[test]
    fn test_malformed_xml_keeps_earlier_rows() {
        let reply = r#"
            <rpc-reply>
              <interface-information>
                <physical-interface>
                  <ifname>ge-0/0/0</ifname>
                  <speed>1000mbps</speed>
                  <traffic-statistics>
                    <input-packets>100</input-packets>
                    <output-packets>200</output-packets>
                  </traffic-statistics>
                </physical-interface>
                <physical-interface>
                  <ifname>ge-0/0/1</ifname>
                  </broken"#;

        let mut grouper = SeriesGrouper::new();
        parse_reply(&if_tree(), "ifcounters", "r1", 0, reply, &mut grouper);

        let out = grouper.into_measurements();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_tag("ifname"), Some("ge-0/0/0"));
    }
}
