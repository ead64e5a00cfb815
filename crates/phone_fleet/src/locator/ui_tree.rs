//! Accessibility tree parsed from a `uiautomator dump`

use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::error::{FleetError, Result};

lazy_static! {
    static ref BOUNDS_PATTERN: Regex =
        Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("valid bounds pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    /// Parse the `[x1,y1][x2,y2]` form
    pub fn parse(raw: &str) -> Result<Self> {
        let caps = BOUNDS_PATTERN
            .captures(raw.trim())
            .ok_or_else(|| FleetError::Parse(format!("malformed bounds: {raw:?}")))?;
        let coord = |i: usize| {
            caps[i]
                .parse::<i32>()
                .map_err(|_| FleetError::Parse(format!("bounds out of range: {raw:?}")))
        };
        let bounds = Self {
            left: coord(1)?,
            top: coord(2)?,
            right: coord(3)?,
            bottom: coord(4)?,
        };
        if bounds.right < bounds.left || bounds.bottom < bounds.top {
            return Err(FleetError::Parse(format!("inverted bounds: {raw:?}")));
        }
        Ok(bounds)
    }

    pub fn center(&self) -> (i32, i32) {
        (midpoint(self.left, self.right), midpoint(self.top, self.bottom))
    }
}

/// Average of two coordinates without overflowing; always within `i32`
fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiNode {
    pub class: String,
    pub text: String,
    pub content_desc: String,
    /// Raw bounds attribute; parsed only for the node that gets tapped
    pub bounds: String,
    pub children: Vec<UiNode>,
}

impl UiNode {
    fn from_element(e: &BytesStart) -> Result<Self> {
        let mut node = UiNode::default();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| FleetError::Parse(format!("attribute error: {e}")))?;
            let value = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            match attr.key.as_ref() {
                b"class" => node.class = value,
                b"text" => node.text = value,
                b"content-desc" => node.content_desc = value,
                b"bounds" => node.bounds = value,
                _ => {}
            }
        }
        Ok(node)
    }

    /// This node and all descendants in document order
    pub fn iter(&self) -> impl Iterator<Item = &UiNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// First node whose description equals `label`, else the first whose text does
    pub fn find(&self, label: &str) -> Option<&UiNode> {
        self.iter()
            .find(|n| n.content_desc == label)
            .or_else(|| self.iter().find(|n| n.text == label))
    }

    pub fn center(&self) -> Result<(i32, i32)> {
        Ok(Bounds::parse(&self.bounds)?.center())
    }
}

/// Parse a dump into a tree rooted at a synthetic `hierarchy` node
pub fn parse_hierarchy(xml: &str) -> Result<UiNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![UiNode {
        class: "hierarchy".to_string(),
        ..UiNode::default()
    }];
    let mut seen_hierarchy = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"node" => stack.push(UiNode::from_element(e)?),
                b"hierarchy" => seen_hierarchy = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"node" => {
                let node = UiNode::from_element(e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"node" => {
                if stack.len() < 2 {
                    return Err(FleetError::Parse("unbalanced node element".to_string()));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FleetError::Parse(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !seen_hierarchy || stack.len() != 1 {
        return Err(FleetError::Parse("incomplete UI hierarchy dump".to_string()));
    }
    stack
        .pop()
        .ok_or_else(|| FleetError::Parse("empty UI hierarchy dump".to_string()))
}

/// Center of the first node matching `label`
pub fn find_center(xml: &str, label: &str) -> Result<(i32, i32)> {
    let root = parse_hierarchy(xml)?;
    let node = root
        .find(label)
        .ok_or_else(|| FleetError::ElementNotFound(label.to_string()))?;
    node.center()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" class="android.widget.FrameLayout" content-desc="" bounds="[0,0][1080,2400]">
    <node index="0" text="Target" class="android.widget.TextView" content-desc="" bounds="[500,500][600,600]" />
    <node index="1" text="" class="android.widget.Button" content-desc="Target" bounds="[10,20][110,120]" />
    <node index="2" text="Tom &amp; Jerry" class="android.widget.TextView" content-desc="" bounds="[0,900][1080,1000]">
      <node index="0" text="nested" class="android.view.View" content-desc="" bounds="[0,950][100,1000]" />
    </node>
    <node index="3" text="Broken" class="android.view.View" content-desc="" bounds="10,20,30,40" />
  </node>
</hierarchy>"#;

    #[test]
    fn test_description_match_beats_earlier_text_match() {
        assert_eq!(find_center(DUMP, "Target").unwrap(), (60, 70));
    }

    #[test]
    fn test_text_fallback_and_entities() {
        assert_eq!(find_center(DUMP, "Tom & Jerry").unwrap(), (540, 950));
        assert_eq!(find_center(DUMP, "nested").unwrap(), (50, 975));
    }

    #[test]
    fn test_not_found_is_distinct() {
        let err = find_center(DUMP, "Missing").unwrap_err();
        assert!(matches!(err, FleetError::ElementNotFound(ref l) if l == "Missing"));
    }

    #[test]
    fn test_malformed_bounds_is_parse_failure() {
        assert!(matches!(
            find_center(DUMP, "Broken"),
            Err(FleetError::Parse(_))
        ));
    }

    #[test]
    fn test_tree_shape_and_order() {
        let root = parse_hierarchy(DUMP).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children.len(), 4);
        let classes: Vec<_> = root.iter().skip(1).map(|n| n.class.as_str()).take(3).collect();
        assert_eq!(
            classes,
            vec![
                "android.widget.FrameLayout",
                "android.widget.TextView",
                "android.widget.Button"
            ]
        );
    }

    #[test]
    fn test_truncated_dump_is_parse_failure() {
        assert!(matches!(
            parse_hierarchy("<hierarchy><node text=\"a\">"),
            Err(FleetError::Parse(_))
        ));
        assert!(matches!(parse_hierarchy(""), Err(FleetError::Parse(_))));
    }

    #[test]
    fn test_bounds_parse() {
        let b = Bounds::parse("[10,20][110,120]").unwrap();
        assert_eq!(b.center(), (60, 70));
        assert!(Bounds::parse("[10,20]").is_err());
    }

    #[test]
    fn test_extreme_bounds_center_without_overflow() {
        let xml = r#"<hierarchy><node text="T" content-desc="" bounds="[2147483647,0][2147483647,10]" /></hierarchy>"#;
        assert_eq!(find_center(xml, "T").unwrap(), (i32::MAX, 5));

        let b = Bounds::parse("[-2147483648,-2147483648][2147483647,2147483647]").unwrap();
        assert_eq!(b.center(), (0, 0));
    }

    #[test]
    fn test_inverted_bounds_is_parse_failure() {
        assert!(matches!(
            Bounds::parse("[110,20][10,120]"),
            Err(FleetError::Parse(_))
        ));
    }
}
